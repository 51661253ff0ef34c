//! State shared by everything taking part in one build.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use modpak_asset::ConversionReport;
use modpak_iostore::CompressionTally;
use tracing::info;

/// Stages of a build, entered in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Collecting,
    Resolving,
    Converting,
    Planning,
    Writing,
    Finalized,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Collecting => "collecting",
            BuildStage::Resolving => "resolving",
            BuildStage::Converting => "converting",
            BuildStage::Planning => "planning",
            BuildStage::Writing => "writing",
            BuildStage::Finalized => "finalized",
        })
    }
}

/// Counters, the cancellation flag and the current stage of one build
///
/// A context is created per build and borrowed by every worker, so concurrent builds never share
/// counters.
#[derive(Debug)]
pub struct BuildContext {
    tally: CompressionTally,
    report: ConversionReport,
    cancel: AtomicBool,
    stage: Mutex<BuildStage>,
    skipped: Mutex<Vec<String>>,
}

impl Default for BuildContext {
    fn default() -> Self {
        BuildContext {
            tally: CompressionTally::new(),
            report: ConversionReport::new(),
            cancel: AtomicBool::new(false),
            stage: Mutex::new(BuildStage::Collecting),
            skipped: Mutex::new(Vec::new()),
        }
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> &CompressionTally {
        &self.tally
    }

    pub fn report(&self) -> &ConversionReport {
        &self.report
    }

    /// Asks the build to stop. Blocks already being compressed finish, nothing is written.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancellation(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn stage(&self) -> BuildStage {
        *self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves to `stage`. Stages never go backwards.
    pub fn enter(&self, stage: BuildStage) {
        let mut current = self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if stage > *current {
            *current = stage;
            info!(%stage, "build stage");
        }
    }

    /// Records an asset left out of the container.
    pub fn skip(&self, path: impl Into<String>) {
        self.skipped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.into());
    }

    /// Assets left out so far, sorted
    pub fn skipped(&self) -> Vec<String> {
        let mut skipped = self
            .skipped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        skipped.sort();
        skipped
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::context::{BuildContext, BuildStage};

    #[traced_test]
    #[test]
    fn stages_only_move_forward() {
        let context = BuildContext::new();
        assert_eq!(context.stage(), BuildStage::Collecting);

        context.enter(BuildStage::Converting);
        context.enter(BuildStage::Resolving);
        assert_eq!(context.stage(), BuildStage::Converting);
        assert!(logs_contain("stage=converting"));
        assert!(!logs_contain("stage=resolving"));
    }

    #[test]
    fn skipped_assets_are_sorted() {
        let context = BuildContext::new();
        std::thread::scope(|scope| {
            scope.spawn(|| context.skip("Mod/Content/B.uasset"));
            scope.spawn(|| context.skip("Mod/Content/A.uasset"));
        });
        assert_eq!(
            context.skipped(),
            vec!["Mod/Content/A.uasset".to_string(), "Mod/Content/B.uasset".to_string()]
        );
    }

    #[test]
    fn cancellation_is_shared() {
        let context = BuildContext::new();
        assert!(!context.is_cancelled());
        context.cancel();
        assert!(context.cancellation().load(std::sync::atomic::Ordering::Relaxed));
    }
}
