//! Decides, block by block, whether a chunk is stored raw or compressed.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{trace, warn};

use crate::chunk::ChunkCategory;
use crate::codec::{BlockCodec, CompressionMethod};

/// Size of every container block except the last block of a chunk
pub const BLOCK_SIZE: usize = 0x20000;

/// Final form of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBlock {
    /// Length of the block before compression
    pub raw_len: usize,
    /// Bytes written to the `.ucas`, without padding
    pub stored: Vec<u8>,
    pub compressed: bool,
}

impl PlannedBlock {
    fn raw(block: &[u8]) -> Self {
        PlannedBlock {
            raw_len: block.len(),
            stored: block.to_vec(),
            compressed: false,
        }
    }
}

/// Per-run count of blocks that ended up stored compressed
#[derive(Debug, Default)]
pub struct CompressionTally {
    bulk: AtomicUsize,
    shaders: AtomicUsize,
    export: AtomicUsize,
}

impl CompressionTally {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, category: ChunkCategory) {
        let counter = match category {
            ChunkCategory::BulkData => &self.bulk,
            ChunkCategory::ShaderLibrary => &self.shaders,
            ChunkCategory::ExportBundleData => &self.export,
            ChunkCategory::ContainerHeader | ChunkCategory::CompanionNames => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bulk(&self) -> usize {
        self.bulk.load(Ordering::Relaxed)
    }

    pub fn shaders(&self) -> usize {
        self.shaders.load(Ordering::Relaxed)
    }

    pub fn export(&self) -> usize {
        self.export.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.bulk() + self.shaders() + self.export()
    }
}

/// Applies the storage policy of each chunk category to its blocks
///
/// Container headers and chunk name lists are never compressed. Every other block is compressed
/// with the configured codec and kept compressed only when the result is strictly smaller. A
/// failing or missing codec leaves the block raw.
#[derive(Clone, Copy)]
pub struct CompressionPlanner<'a> {
    codec: Option<&'a dyn BlockCodec>,
    tally: &'a CompressionTally,
}

impl<'a> CompressionPlanner<'a> {
    pub fn new(codec: Option<&'a dyn BlockCodec>, tally: &'a CompressionTally) -> Self {
        CompressionPlanner { codec, tally }
    }

    /// Codec the planner compresses with, [`CompressionMethod::None`] without one
    pub fn method(&self) -> CompressionMethod {
        self.codec
            .map(|codec| codec.method())
            .unwrap_or(CompressionMethod::None)
    }

    pub fn tally(&self) -> &'a CompressionTally {
        self.tally
    }

    /// Plans a single block of at most [`BLOCK_SIZE`] bytes.
    pub fn plan_block(&self, category: ChunkCategory, block: &[u8]) -> PlannedBlock {
        debug_assert!(block.len() <= BLOCK_SIZE);

        if !category.compression_allowed() {
            return PlannedBlock::raw(block);
        }
        let Some(codec) = self.codec else {
            return PlannedBlock::raw(block);
        };

        match codec.compress(block) {
            Ok(compressed) if compressed.len() < block.len() => {
                self.tally.record(category);
                PlannedBlock {
                    raw_len: block.len(),
                    stored: compressed,
                    compressed: true,
                }
            }
            Ok(compressed) => {
                trace!(
                    %category,
                    raw = block.len(),
                    compressed = compressed.len(),
                    "compression did not shrink block"
                );
                PlannedBlock::raw(block)
            }
            Err(error) => {
                warn!(%category, %error, "storing block raw");
                PlannedBlock::raw(block)
            }
        }
    }

    /// Splits a chunk into blocks and plans each of them in order.
    pub fn plan_chunk(&self, category: ChunkCategory, payload: &[u8]) -> Vec<PlannedBlock> {
        payload
            .chunks(BLOCK_SIZE)
            .map(|block| self.plan_block(category, block))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::chunk::ChunkCategory;
    use crate::codec::{BlockCodec, CodecError, CompressionMethod, ZlibCodec};
    use crate::planner::{CompressionPlanner, CompressionTally, BLOCK_SIZE};

    struct FailingCodec;

    impl BlockCodec for FailingCodec {
        fn method(&self) -> CompressionMethod {
            CompressionMethod::Oodle
        }

        fn compress(&self, _block: &[u8]) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Failure("broken".into()))
        }
    }

    /// Pretends to compress by returning a block of the same size
    struct InflatingCodec;

    impl BlockCodec for InflatingCodec {
        fn method(&self) -> CompressionMethod {
            CompressionMethod::Oodle
        }

        fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(vec![0; block.len()])
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545F4914F6CDD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn container_header_is_never_compressed() {
        let tally = CompressionTally::new();
        let codec = ZlibCodec::default();
        let planner = CompressionPlanner::new(Some(&codec), &tally);

        let block = vec![0u8; 4096];
        for category in [ChunkCategory::ContainerHeader, ChunkCategory::CompanionNames] {
            let planned = planner.plan_block(category, &block);
            assert!(!planned.compressed);
            assert_eq!(planned.stored, block);
        }
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn compressible_blocks_are_counted_per_category() {
        let tally = CompressionTally::new();
        let codec = ZlibCodec::default();
        let planner = CompressionPlanner::new(Some(&codec), &tally);

        let payload = vec![7u8; BLOCK_SIZE * 2 + 10];
        let blocks = planner.plan_chunk(ChunkCategory::BulkData, &payload);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|block| block.compressed));
        assert_eq!(blocks[2].raw_len, 10);

        planner.plan_block(ChunkCategory::ShaderLibrary, &[1u8; 512]);
        planner.plan_block(ChunkCategory::ExportBundleData, &[2u8; 512]);

        assert_eq!(tally.bulk(), 3);
        assert_eq!(tally.shaders(), 1);
        assert_eq!(tally.export(), 1);
        assert_eq!(tally.total(), 5);
    }

    #[test]
    fn incompressible_blocks_stay_raw() {
        let tally = CompressionTally::new();
        let codec = ZlibCodec::default();
        let planner = CompressionPlanner::new(Some(&codec), &tally);

        let block = noise(1024);
        let planned = planner.plan_block(ChunkCategory::BulkData, &block);
        assert!(!planned.compressed);
        assert_eq!(planned.stored, block);
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn equal_size_is_not_kept() {
        let tally = CompressionTally::new();
        let planner = CompressionPlanner::new(Some(&InflatingCodec), &tally);

        let planned = planner.plan_block(ChunkCategory::ExportBundleData, &[9u8; 64]);
        assert!(!planned.compressed);
        assert_eq!(planned.stored, vec![9u8; 64]);
        assert_eq!(tally.export(), 0);
    }

    #[traced_test]
    #[test]
    fn codec_failure_falls_back_to_raw() {
        let tally = CompressionTally::new();
        let planner = CompressionPlanner::new(Some(&FailingCodec), &tally);

        let planned = planner.plan_block(ChunkCategory::ShaderLibrary, &[0u8; 256]);
        assert!(!planned.compressed);
        assert_eq!(planned.raw_len, 256);
        assert_eq!(tally.total(), 0);
        assert!(logs_contain("storing block raw"));
    }

    #[test]
    fn missing_codec_stores_everything_raw() {
        let tally = CompressionTally::new();
        let planner = CompressionPlanner::new(None, &tally);

        assert_eq!(planner.method(), CompressionMethod::None);
        let blocks = planner.plan_chunk(ChunkCategory::BulkData, &vec![0u8; BLOCK_SIZE + 1]);
        assert!(blocks.iter().all(|block| !block.compressed));
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn empty_chunk_has_no_blocks() {
        let tally = CompressionTally::new();
        let planner = CompressionPlanner::new(None, &tally);
        assert!(planner.plan_chunk(ChunkCategory::BulkData, &[]).is_empty());
    }
}
