//! Types for writing IoStore containers
//!

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use binrw::BinWrite;
use bon::Builder;
use modpak_pak::{PakWriter, PakWriterOptions};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::chunk::{container_id, ChunkCategory, ChunkId};
use crate::directory_index::DirectoryIndexBuilder;
use crate::error::{Error, Result};
use crate::planner::{CompressionPlanner, PlannedBlock, BLOCK_SIZE};
use crate::types::{
    write_method_name, ChunkMeta, CompressedBlockEntry, OffsetAndLength, TocHeader,
    CONTAINER_FLAG_COMPRESSED, CONTAINER_FLAG_INDEXED, UCAS_ALIGNMENT,
};

/// Name of the entry listing the container's files inside the companion PAK
pub const CHUNK_NAMES_ENTRY: &str = "chunknames";

const PADDING: [u8; UCAS_ALIGNMENT as usize] = [0; UCAS_ALIGNMENT as usize];

/// Largest value of the 40 bit offsets and lengths of the TOC
const MAX_U40: u64 = (1 << 40) - 1;

/// Options for how the container should be written
#[derive(Debug, Clone, Builder)]
pub struct ContainerOptions {
    /// Stem of the output files, also hashed into the container id
    #[builder(into)]
    pub name: String,

    /// Mount point of the directory index and the companion PAK
    #[builder(into, default = String::from("../../../"))]
    pub mount_point: String,

    /// Seed of the companion PAK's path hash index
    #[builder(default)]
    pub path_hash_seed: u64,
}

impl ContainerOptions {
    pub fn container_id(&self) -> u64 {
        container_id(&self.name)
    }
}

/// A chunk waiting to be placed in the container
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub id: ChunkId,
    pub category: ChunkCategory,
    /// Path relative to the mount point, listed in the directory index when present
    pub path: Option<String>,
    pub payload: Vec<u8>,
}

/// Paths of the files produced by [`ContainerWriter::finish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFiles {
    pub utoc: PathBuf,
    pub ucas: PathBuf,
    pub pak: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub chunks: usize,
    pub blocks: usize,
    pub compressed_blocks: usize,
    pub ucas_size: u64,
}

struct BlockJob<'c> {
    category: ChunkCategory,
    data: &'c [u8],
}

/// IoStore container generator
///
/// Chunks are placed in the order they are added, each starting on a block boundary of the
/// uncompressed address space. The container header chunk must be added last. Blocks are planned
/// in parallel and collected by ordinal, so the output does not depend on scheduling.
///
/// ```no_run
/// # fn doit() -> modpak_iostore::error::Result<()>
/// # {
/// use modpak_iostore::chunk::{ChunkCategory, ChunkId};
/// use modpak_iostore::container_header::ContainerHeader;
/// use modpak_iostore::planner::{CompressionPlanner, CompressionTally};
/// use modpak_iostore::write::{ContainerOptions, ContainerWriter, PendingChunk};
///
/// let tally = CompressionTally::new();
/// let options = ContainerOptions::builder().name("MyMod_9999999_P").build();
/// let container_id = options.container_id();
/// let mut writer = ContainerWriter::new(options, CompressionPlanner::new(None, &tally));
///
/// writer.add_chunk(PendingChunk {
///     id: ChunkId::container_header(container_id),
///     category: ChunkCategory::ContainerHeader,
///     path: None,
///     payload: ContainerHeader::new(container_id).to_bytes()?,
/// })?;
/// writer.finish(std::path::Path::new("out"))?;
/// # Ok(())
/// # }
/// ```
pub struct ContainerWriter<'a> {
    options: ContainerOptions,
    planner: CompressionPlanner<'a>,
    cancel: Option<&'a AtomicBool>,
    chunks: Vec<PendingChunk>,
    ids: HashSet<ChunkId>,
    companion_names: BTreeSet<String>,
}

impl<'a> ContainerWriter<'a> {
    pub fn new(options: ContainerOptions, planner: CompressionPlanner<'a>) -> Self {
        ContainerWriter {
            options,
            planner,
            cancel: None,
            chunks: Vec::new(),
            ids: HashSet::new(),
            companion_names: BTreeSet::new(),
        }
    }

    /// Stops block planning and fails the write once `cancel` is set.
    pub fn with_cancellation(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Queues a chunk, rejecting anything that would make the container inconsistent.
    #[instrument(skip(self, chunk), fields(id = %chunk.id, size = chunk.payload.len()), err)]
    pub fn add_chunk(&mut self, chunk: PendingChunk) -> Result<()> {
        if !chunk.category.accepts(chunk.id.chunk_type) {
            return Err(Error::LayoutViolation(format!(
                "{} chunk {} has type {:?}",
                chunk.category, chunk.id, chunk.id.chunk_type
            )));
        }
        if self
            .chunks
            .last()
            .is_some_and(|last| last.category == ChunkCategory::ContainerHeader)
        {
            return Err(Error::LayoutViolation(format!(
                "chunk {} added after the container header",
                chunk.id
            )));
        }
        if chunk.category == ChunkCategory::ContainerHeader
            && chunk.id != ChunkId::container_header(self.options.container_id())
        {
            return Err(Error::LayoutViolation(format!(
                "container header {} does not belong to container {}",
                chunk.id, self.options.name
            )));
        }
        if chunk.payload.len() as u64 > MAX_U40 {
            return Err(Error::LayoutViolation(format!(
                "chunk {} is too large",
                chunk.id
            )));
        }
        if !self.ids.insert(chunk.id) {
            return Err(Error::LayoutViolation(format!(
                "duplicate chunk id {}",
                chunk.id
            )));
        }

        if let Some(path) = &chunk.path {
            self.companion_names.insert(path.clone());
        }
        self.chunks.push(chunk);
        Ok(())
    }

    /// Lists an additional file in the companion PAK's chunk names, e.g. a `.uexp` merged into an
    /// export bundle.
    pub fn add_companion_name(&mut self, name: impl Into<String>) {
        self.companion_names.insert(name.into());
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }

    /// Checks that the queued chunks form a complete container.
    pub fn validate(&self) -> Result<()> {
        match self.chunks.last() {
            Some(last) if last.category == ChunkCategory::ContainerHeader => Ok(()),
            _ => Err(Error::LayoutViolation(
                "the container header must be the last chunk".into(),
            )),
        }
    }

    fn plan_blocks(&self) -> Result<Vec<PlannedBlock>> {
        let jobs = self
            .chunks
            .iter()
            .flat_map(|chunk| {
                chunk.payload.chunks(BLOCK_SIZE).map(move |data| BlockJob {
                    category: chunk.category,
                    data,
                })
            })
            .collect::<Vec<_>>();

        let mut arena: Vec<Option<PlannedBlock>> = Vec::new();
        arena.resize_with(jobs.len(), || None);

        arena
            .par_iter_mut()
            .zip(jobs.par_iter())
            .for_each(|(slot, job)| {
                if self.is_cancelled() {
                    return;
                }
                *slot = Some(self.planner.plan_block(job.category, job.data));
            });

        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        arena
            .into_iter()
            .zip(jobs)
            .enumerate()
            .map(|(ordinal, (block, job))| match block {
                Some(block) if block.raw_len != job.data.len() => Err(Error::LayoutViolation(
                    format!("block {ordinal} changed its uncompressed size"),
                )),
                Some(block) if block.stored.len() > block.raw_len => Err(Error::LayoutViolation(
                    format!("block {ordinal} is stored larger than its raw size"),
                )),
                Some(block) => Ok(block),
                None => Err(Error::LayoutViolation(format!(
                    "block {ordinal} was never planned"
                ))),
            })
            .collect()
    }

    /// Validates the layout and plans every block, compressing them in parallel.
    ///
    /// Planning consumes the writer, so every block is counted in the tally exactly once.
    #[instrument(skip_all, fields(name = self.options.name.as_str()), err)]
    pub fn plan(self) -> Result<PlannedContainer<'a>> {
        self.validate()?;
        let blocks = self.plan_blocks()?;
        Ok(PlannedContainer {
            writer: self,
            blocks,
        })
    }

    /// Plans the container and writes it into `output_dir`, see [`PlannedContainer::finish`].
    pub fn finish(self, output_dir: &Path) -> Result<(ContainerFiles, ContainerStats)> {
        self.plan()?.finish(output_dir)
    }

    fn write_planned<T: Write, C: Write, P: Write + Seek>(
        &self,
        blocks: &[PlannedBlock],
        mut utoc: T,
        mut ucas: C,
        pak: P,
    ) -> Result<ContainerStats> {
        let mut placements = Vec::with_capacity(self.chunks.len());
        let mut metas = Vec::with_capacity(self.chunks.len());
        let mut first_block = 0usize;
        for chunk in &self.chunks {
            let block_count = chunk.payload.len().div_ceil(BLOCK_SIZE);
            let chunk_blocks = blocks
                .get(first_block..first_block + block_count)
                .ok_or_else(|| {
                    Error::LayoutViolation(format!("chunk {} is missing blocks", chunk.id))
                })?;

            let placement = OffsetAndLength {
                offset: (first_block * BLOCK_SIZE) as u64,
                length: chunk.payload.len() as u64,
            };
            if placement.offset + placement.length > MAX_U40 {
                return Err(Error::LayoutViolation(
                    "container exceeds the 40 bit address space".into(),
                ));
            }
            placements.push(placement);
            metas.push(ChunkMeta::new(
                &chunk.payload,
                chunk_blocks.iter().any(|block| block.compressed),
            ));
            first_block += block_count;
        }
        if first_block != blocks.len() {
            return Err(Error::LayoutViolation(format!(
                "{} blocks planned for {} placed",
                blocks.len(),
                first_block
            )));
        }

        let compressed_blocks = blocks.iter().filter(|block| block.compressed).count();
        let methods = match compressed_blocks {
            0 => Vec::new(),
            _ => vec![self.planner.method().name()],
        };

        let mut block_entries = Vec::with_capacity(blocks.len());
        let mut ucas_size = 0u64;
        for block in blocks {
            let stored = block.stored.len() as u64;
            let padding = stored.next_multiple_of(UCAS_ALIGNMENT) - stored;
            block_entries.push(CompressedBlockEntry {
                offset: ucas_size,
                compressed_size: block.stored.len() as u32,
                uncompressed_size: block.raw_len as u32,
                compression_method_index: block.compressed as u8,
            });
            ucas_size += stored + padding;
        }
        if ucas_size > MAX_U40 {
            return Err(Error::LayoutViolation(
                "the .ucas exceeds the 40 bit address space".into(),
            ));
        }

        let mut directory = DirectoryIndexBuilder::new(self.options.mount_point.as_str());
        for (toc_index, chunk) in self.chunks.iter().enumerate() {
            if let Some(path) = &chunk.path {
                directory.add_file(path, toc_index as u32);
            }
        }
        let mut directory_index = Vec::new();
        directory.write(&mut directory_index)?;

        let header = TocHeader {
            entry_count: self.chunks.len() as u32,
            compressed_block_entry_count: blocks.len() as u32,
            compression_method_name_count: methods.len() as u32,
            compression_block_size: BLOCK_SIZE as u32,
            directory_index_size: directory_index.len() as u32,
            container_id: self.options.container_id(),
            container_flags: CONTAINER_FLAG_INDEXED
                | match compressed_blocks {
                    0 => 0,
                    _ => CONTAINER_FLAG_COMPRESSED,
                },
            ..Default::default()
        };

        let mut toc = Cursor::new(Vec::new());
        header.write(&mut toc)?;
        for chunk in &self.chunks {
            toc.write_all(&chunk.id.to_bytes())?;
        }
        for placement in &placements {
            placement.write(&mut toc)?;
        }
        for entry in &block_entries {
            entry.write(&mut toc)?;
        }
        for method in &methods {
            write_method_name(&mut toc, method)?;
        }
        toc.write_all(&directory_index)?;
        for meta in &metas {
            meta.write(&mut toc)?;
        }

        for block in blocks {
            ucas.write_all(&block.stored)?;
            let padding = block.stored.len().next_multiple_of(PADDING.len()) - block.stored.len();
            ucas.write_all(&PADDING[..padding])?;
        }
        ucas.flush()?;

        utoc.write_all(toc.get_ref())?;
        utoc.flush()?;

        let names = self
            .companion_names
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let mut companion = PakWriter::new(
            pak,
            PakWriterOptions::builder()
                .mount_point(self.options.mount_point.as_str())
                .path_hash_seed(self.options.path_hash_seed)
                .build(),
        );
        companion.write_entry(CHUNK_NAMES_ENTRY, names.as_bytes())?;
        companion.finish()?.flush()?;

        let stats = ContainerStats {
            chunks: self.chunks.len(),
            blocks: blocks.len(),
            compressed_blocks,
            ucas_size,
        };
        debug!(?stats, "container written");
        Ok(stats)
    }
}

/// A container whose blocks are planned, ready to be written
pub struct PlannedContainer<'a> {
    writer: ContainerWriter<'a>,
    blocks: Vec<PlannedBlock>,
}

impl<'a> PlannedContainer<'a> {
    pub fn options(&self) -> &ContainerOptions {
        &self.writer.options
    }

    pub fn compressed_blocks(&self) -> usize {
        self.blocks.iter().filter(|block| block.compressed).count()
    }

    /// Writes the `.utoc`, `.ucas` and companion `.pak`. Can be repeated without compressing again.
    pub fn write_to<T: Write, C: Write, P: Write + Seek>(
        &self,
        utoc: T,
        ucas: C,
        pak: P,
    ) -> Result<ContainerStats> {
        self.writer.write_planned(&self.blocks, utoc, ucas, pak)
    }

    /// Writes `<name>.utoc`, `<name>.ucas` and `<name>.pak` into `output_dir`
    ///
    /// The files are written next to their destination under temporary names and only moved into
    /// place once all three are complete, replacing existing files. On error no output is left
    /// behind.
    #[instrument(skip(self), fields(name = self.writer.options.name.as_str()), err)]
    pub fn finish(self, output_dir: &Path) -> Result<(ContainerFiles, ContainerStats)> {
        fs::create_dir_all(output_dir)?;
        let files = ContainerFiles {
            utoc: output_dir.join(format!("{}.utoc", self.writer.options.name)),
            ucas: output_dir.join(format!("{}.ucas", self.writer.options.name)),
            pak: output_dir.join(format!("{}.pak", self.writer.options.name)),
        };

        let temporary_file = || {
            tempfile::Builder::new()
                .prefix(".modpak-")
                .tempfile_in(output_dir)
        };
        let mut utoc = temporary_file()?;
        let mut ucas = temporary_file()?;
        let mut pak = temporary_file()?;

        let stats = {
            let mut utoc_writer = BufWriter::new(utoc.as_file_mut());
            let mut ucas_writer = BufWriter::new(ucas.as_file_mut());
            let mut pak_writer = BufWriter::new(pak.as_file_mut());
            let stats = self.write_to(&mut utoc_writer, &mut ucas_writer, &mut pak_writer)?;
            utoc_writer.flush()?;
            ucas_writer.flush()?;
            pak_writer.flush()?;
            stats
        };

        if self.writer.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut persisted: Vec<&Path> = Vec::with_capacity(3);
        for (file, path) in [(ucas, &files.ucas), (utoc, &files.utoc), (pak, &files.pak)] {
            if let Err(error) = file.persist(path) {
                for done in persisted {
                    let _ = fs::remove_file(done);
                }
                return Err(Error::Persist {
                    path: path.display().to_string(),
                    source: error.error,
                });
            }
            persisted.push(path);
        }

        info!(
            utoc = %files.utoc.display(),
            chunks = stats.chunks,
            blocks = stats.blocks,
            compressed_blocks = stats.compressed_blocks,
            "wrote container"
        );
        Ok((files, stats))
    }
}
