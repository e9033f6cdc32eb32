use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const BAR_PREFIX: &[&str] = &["Chain", "Ledger"];

/// Console progress: the chain tip and the ledger watermark.
pub struct IndexOutput {
    mp: MultiProgress,
    chain_bar: ProgressBar,
    index_bar: ProgressBar,
}

impl IndexOutput {
    pub fn new() -> Self {
        let mp = MultiProgress::new();

        let max_prefix_width = BAR_PREFIX.iter().map(|s| s.len()).max().unwrap_or(0);
        let chain_bar = Self::create_bar(format!(
            "{:<width$}",
            BAR_PREFIX[0],
            width = max_prefix_width
        ));
        let chain_bar = mp.add(chain_bar);

        let index_bar = Self::create_bar(format!(
            "{:<width$}",
            BAR_PREFIX[1],
            width = max_prefix_width
        ));
        let index_bar = mp.add(index_bar);

        Self {
            mp,
            chain_bar,
            index_bar,
        }
    }

    fn create_bar(prefix: String) -> ProgressBar {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
            .template("{prefix} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {per_sec} {percent}% ({eta_precise} remaining) {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("#>-"),
        );
        bar.set_prefix(prefix);
        bar
    }

    pub fn println(&self, msg: &str) {
        info!("{}", msg);
        if let Err(e) = self.mp.println(msg) {
            error!("Failed to print message to console: {}", e);
        }
    }

    pub fn update_total_block_height(&self, total: u64) {
        let first = self.chain_bar.length().unwrap_or(0) == 0;

        self.chain_bar.set_length(total);
        self.chain_bar.set_position(total);
        self.index_bar.set_length(total);
        if first && total > 0 {
            self.chain_bar.reset_eta();
            self.index_bar.reset_eta();
        }
    }

    pub fn update_current_height(&self, current: u64) {
        self.index_bar.set_position(current);
    }

    pub fn set_message(&self, msg: &str) {
        self.index_bar.set_message(msg.to_string());
    }

    pub fn finish(&self) {
        self.chain_bar.finish();
        self.index_bar.finish();
    }
}

pub type IndexOutputRef = std::sync::Arc<IndexOutput>;
