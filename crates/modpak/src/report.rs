//! The one line every successful build ends with.

use std::fmt;

use modpak_iostore::CompressionTally;
use tracing::info;

/// Blocks stored compressed, per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionSummary {
    pub total: usize,
    pub bulk: usize,
    pub shaders: usize,
    pub export: usize,
}

impl From<&CompressionTally> for CompressionSummary {
    fn from(tally: &CompressionTally) -> Self {
        CompressionSummary {
            total: tally.total(),
            bulk: tally.bulk(),
            shaders: tally.shaders(),
            export: tally.export(),
        }
    }
}

impl fmt::Display for CompressionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoStore compression summary: total_blocks_compressed={} bulk={} shaders={} export={}",
            self.total, self.bulk, self.shaders, self.export
        )
    }
}

/// Logs the summary of a finished build.
pub fn report(tally: &CompressionTally) -> CompressionSummary {
    let summary = CompressionSummary::from(tally);
    info!("{summary}");
    summary
}

#[cfg(test)]
mod test {
    use modpak_iostore::chunk::ChunkCategory;
    use modpak_iostore::codec::ZlibCodec;
    use modpak_iostore::planner::BLOCK_SIZE;
    use modpak_iostore::{CompressionPlanner, CompressionTally};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::report::{report, CompressionSummary};

    #[traced_test]
    #[test]
    fn summary_line() {
        let tally = CompressionTally::new();
        let codec = ZlibCodec::default();
        let planner = CompressionPlanner::new(Some(&codec), &tally);
        let block = vec![7u8; BLOCK_SIZE];
        planner.plan_block(ChunkCategory::BulkData, &block);
        planner.plan_block(ChunkCategory::BulkData, &block);
        planner.plan_block(ChunkCategory::ExportBundleData, &block);
        planner.plan_block(ChunkCategory::ContainerHeader, &block);

        let summary = report(&tally);
        assert_eq!(
            summary,
            CompressionSummary {
                total: 3,
                bulk: 2,
                shaders: 0,
                export: 1,
            }
        );
        assert!(logs_contain(
            "IoStore compression summary: total_blocks_compressed=3 bulk=2 shaders=0 export=1"
        ));
    }

    #[test]
    fn empty_build_reports_zeros() {
        assert_eq!(
            CompressionSummary::from(&CompressionTally::new()).to_string(),
            "IoStore compression summary: total_blocks_compressed=0 bulk=0 shaders=0 export=0"
        );
    }
}
