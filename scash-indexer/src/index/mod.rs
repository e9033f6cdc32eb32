mod block;
mod perspective;
mod sync;

pub use block::*;
pub use perspective::*;
pub use sync::*;
