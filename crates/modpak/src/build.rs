//! The build pipeline, from a directory of extracted files to a container.

use std::fs;
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use bon::Builder;
use modpak_asset::ids::PackageId;
use modpak_asset::{LegacyPackage, ZenConverter};
use modpak_iostore::chunk::{ChunkId, ChunkType};
use modpak_iostore::codec::{BlockCodec, CompressionMethod, OodleCodec, ZlibCodec};
use modpak_iostore::container_header::{ContainerHeader, StoreEntry};
use modpak_iostore::write::{
    ContainerFiles, ContainerOptions, ContainerStats, ContainerWriter, PendingChunk,
};
use modpak_iostore::CompressionPlanner;
use modpak_pak::{PakWriter, PakWriterOptions};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::bridge::{apply_fix, AssetBridge, AssetFix};
use crate::classifier::{
    classify, is_media_only, loose_chunk_id, shader_library_id, Classification, EntryKind,
    ExtractedEntry, PackageGroup, CONTAINER_HEADER_RECORD,
};
use crate::context::{BuildContext, BuildStage};
use crate::error::{Error, Result};
use crate::naming::container_name;
use crate::report::{report, CompressionSummary};

/// Options for how a mod should be built
#[derive(Debug, Clone, Builder)]
pub struct BuildOptions {
    /// Directory holding the extracted mod
    #[builder(into)]
    pub input: PathBuf,

    /// Directory the output is written to
    #[builder(into)]
    pub output: PathBuf,

    /// Name of the mod, see [`container_name`]
    #[builder(into)]
    pub name: String,

    #[builder(into, default = String::from("../../../"))]
    pub mount_point: String,

    #[builder(default)]
    pub path_hash_seed: u64,

    /// Turn off mipmaps of textures through the asset bridge before packaging
    #[builder(default)]
    pub fix_textures: bool,

    /// Patch skeletal and static meshes through the asset bridge before packaging
    #[builder(default)]
    pub fix_meshes: bool,

    /// Replace existing output files
    #[builder(default)]
    pub overwrite: bool,
}

/// Files written by a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutput {
    Container {
        files: ContainerFiles,
        stats: ContainerStats,
    },
    /// Audio and movie mods are written as a legacy archive holding every file
    Archive(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Stem of the output files
    pub name: String,
    pub output: BuildOutput,
    /// Packages converted into the container
    pub converted: usize,
    /// Assets left out, relative to the input directory
    pub skipped: Vec<String>,
    pub summary: CompressionSummary,
}

/// The codec for `method`, `None` when blocks are stored raw.
pub fn load_codec(
    method: CompressionMethod,
    oodle_library: Option<&Path>,
) -> Result<Option<Box<dyn BlockCodec>>> {
    let codec: Box<dyn BlockCodec> = match method {
        CompressionMethod::None => return Ok(None),
        CompressionMethod::Zlib => Box::new(ZlibCodec::default()),
        CompressionMethod::Oodle => Box::new(
            OodleCodec::load(oodle_library)
                .map_err(|error| Error::MissingCollaborator(error.to_string()))?,
        ),
    };
    Ok(Some(codec))
}

struct ConvertedPackage<'c> {
    group: &'c PackageGroup,
    package_id: PackageId,
    export_bundle: Vec<u8>,
    store_entry: StoreEntry,
}

fn convert_package<'c>(
    converter: &ZenConverter,
    entries: &[ExtractedEntry],
    group: &'c PackageGroup,
    package: &LegacyPackage,
) -> modpak_asset::error::Result<ConvertedPackage<'c>> {
    let zen = converter.convert(package, &group.name)?;
    let export_data = match group.exports {
        Some(exports) => package.export_data(&entries[exports].bytes)?,
        None => &[],
    };

    Ok(ConvertedPackage {
        group,
        package_id: zen.package_id,
        export_bundle: zen.export_bundle(export_data)?,
        store_entry: StoreEntry {
            imported_packages: zen.imported_package_ids(),
            shader_map_hashes: Vec::new(),
        },
    })
}

fn asset_class(path: &Path) -> modpak_asset::error::Result<Option<String>> {
    let data = fs::read(path)?;
    LegacyPackage::parse(&data)?.asset_class()
}

/// Builds one mod
///
/// Assets that cannot be resolved or converted are left out with a warning, together with their
/// bulk data. Anything else going wrong fails the build without leaving output behind.
///
/// ```no_run
/// # fn doit() -> modpak::error::Result<()>
/// # {
/// use modpak::build::{load_codec, BuildOptions, Pipeline};
/// use modpak::context::BuildContext;
/// use modpak_iostore::CompressionMethod;
///
/// let options = BuildOptions::builder()
///     .input("extracted/HeroSkin")
///     .output("mods")
///     .name("HeroSkin")
///     .build();
/// let codec = load_codec(CompressionMethod::Zlib, None)?;
/// let context = BuildContext::new();
///
/// let outcome = Pipeline::new(&options, &context)
///     .with_codec(codec.as_deref())
///     .run()?;
/// println!("{}", outcome.summary);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<'a> {
    options: &'a BuildOptions,
    context: &'a BuildContext,
    codec: Option<&'a dyn BlockCodec>,
    bridge: Option<&'a dyn AssetBridge>,
}

impl<'a> Pipeline<'a> {
    pub fn new(options: &'a BuildOptions, context: &'a BuildContext) -> Self {
        Pipeline {
            options,
            context,
            codec: None,
            bridge: None,
        }
    }

    /// Compresses blocks with `codec`. Without one every block is stored raw.
    pub fn with_codec(mut self, codec: Option<&'a dyn BlockCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_bridge(mut self, bridge: Option<&'a dyn AssetBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    fn enter(&self, stage: BuildStage) -> Result<()> {
        if self.context.is_cancelled() {
            return Err(modpak_iostore::error::Error::Cancelled.into());
        }
        self.context.enter(stage);
        Ok(())
    }

    #[instrument(skip(self), fields(input = %self.options.input.display()), err)]
    pub fn run(&self) -> Result<BuildOutcome> {
        let name = container_name(&self.options.name);

        self.enter(BuildStage::Collecting)?;
        let paths = self.collect()?;
        let fixes = [
            (self.options.fix_meshes, AssetFix::MeshPatch),
            (self.options.fix_textures, AssetFix::NoMipmaps),
        ];
        let fixes = fixes
            .into_iter()
            .filter_map(|(enabled, fix)| enabled.then_some(fix))
            .collect::<Vec<_>>();
        if !fixes.is_empty() {
            self.fix_assets(&paths, &fixes);
        }
        let mut entries = self.read(&paths)?;
        info!(files = entries.len(), "collected mod files");

        if is_media_only(&entries) {
            return self.build_archive(name, &entries);
        }
        self.check_outputs(&name, &["utoc", "ucas", "pak"])?;

        let classification = Classification::new(&entries);
        for orphan in &classification.orphans {
            self.context.skip(entries[*orphan].path.clone());
        }

        self.enter(BuildStage::Resolving)?;
        let resolved = classification
            .packages
            .par_iter()
            .filter_map(|group| match LegacyPackage::parse(&entries[group.header].bytes) {
                Ok(package) => Some((group, package)),
                Err(error) => {
                    self.skip_package(&entries, group, &error);
                    None
                }
            })
            .collect::<Vec<_>>();

        self.enter(BuildStage::Converting)?;
        let converter = ZenConverter::new(self.context.report());
        let converted = resolved
            .par_iter()
            .filter_map(
                |(group, package)| match convert_package(&converter, &entries, *group, package) {
                    Ok(converted) => Some(converted),
                    Err(error) => {
                        self.skip_package(&entries, group, &error);
                        None
                    }
                },
            )
            .collect::<Vec<_>>();
        drop(resolved);

        self.enter(BuildStage::Planning)?;
        let converted_count = converted.len();
        let writer = self.assemble(&name, &mut entries, &classification, converted)?;
        let planned = writer.plan()?;

        self.enter(BuildStage::Writing)?;
        let (files, stats) = planned.finish(&self.options.output)?;

        self.context.enter(BuildStage::Finalized);
        Ok(BuildOutcome {
            name,
            output: BuildOutput::Container { files, stats },
            converted: converted_count,
            skipped: self.context.skipped(),
            summary: report(self.context.tally()),
        })
    }

    fn collect(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.options.input).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            // originals kept by the asset bridge
            if entry.path().extension().is_some_and(|extension| extension == "bak") {
                continue;
            }
            paths.push(entry.into_path());
        }

        if paths.is_empty() {
            return Err(Error::EmptyInput(self.options.input.clone()));
        }
        Ok(paths)
    }

    fn fix_assets(&self, paths: &[PathBuf], fixes: &[AssetFix]) {
        let Some(bridge) = self.bridge.filter(|bridge| bridge.is_available()) else {
            for fix in fixes {
                warn!(
                    error = %Error::MissingCollaborator("asset bridge".into()),
                    "{} are packaged unchanged",
                    fix.subject()
                );
            }
            return;
        };

        for path in paths {
            if EntryKind::of(&path.to_string_lossy()) != EntryKind::PackageHeader {
                continue;
            }
            let class = match asset_class(path) {
                Ok(Some(class)) => class,
                Ok(None) => continue,
                Err(error) => {
                    debug!(path = %path.display(), %error, "asset class unknown, not fixed");
                    continue;
                }
            };
            for fix in fixes.iter().filter(|fix| fix.applies_to(&class)) {
                if let Err(error) = apply_fix(bridge, *fix, path) {
                    warn!(
                        path = %path.display(),
                        %error,
                        action = fix.action(),
                        "unable to fix asset"
                    );
                }
            }
        }
    }

    fn read(&self, paths: &[PathBuf]) -> Result<Vec<ExtractedEntry>> {
        paths
            .par_iter()
            .map(|path| -> Result<ExtractedEntry> {
                let relative = path
                    .strip_prefix(&self.options.input)
                    .map_err(|_| Error::InvalidPath(path.clone()))?;
                let components = relative
                    .components()
                    .map(|component| component.as_os_str().to_str())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| Error::InvalidPath(path.clone()))?;

                Ok(ExtractedEntry {
                    path: components.join("/"),
                    bytes: fs::read(path)?,
                })
            })
            .collect()
    }

    fn check_outputs(&self, name: &str, extensions: &[&str]) -> Result<()> {
        if self.options.overwrite {
            return Ok(());
        }
        for extension in extensions {
            let path = self.options.output.join(format!("{name}.{extension}"));
            if path.exists() {
                return Err(Error::OutputExists(path));
            }
        }
        Ok(())
    }

    fn skip_package(
        &self,
        entries: &[ExtractedEntry],
        group: &PackageGroup,
        error: &modpak_asset::error::Error,
    ) {
        let path = &entries[group.header].path;
        warn!(
            path = %path,
            %error,
            bulk_chunks = group.bulk.len(),
            "skipping asset"
        );
        self.context.skip(path.clone());
    }

    /// Queues every chunk in container order: packages by name, each with its export bundle then
    /// its bulk data, loose files, shader libraries and finally the container header.
    fn assemble(
        &self,
        name: &str,
        entries: &mut [ExtractedEntry],
        classification: &Classification,
        converted: Vec<ConvertedPackage>,
    ) -> Result<ContainerWriter<'a>> {
        let options = ContainerOptions::builder()
            .name(name)
            .mount_point(self.options.mount_point.as_str())
            .path_hash_seed(self.options.path_hash_seed)
            .build();
        let container_id = options.container_id();
        let mut writer = ContainerWriter::new(
            options,
            CompressionPlanner::new(self.codec, self.context.tally()),
        )
        .with_cancellation(self.context.cancellation());
        let mut header = ContainerHeader::new(container_id);

        for package in converted {
            let group = package.group;
            let uasset = &entries[group.header];
            writer.add_chunk(PendingChunk {
                id: ChunkId::package(package.package_id, ChunkType::ExportBundleData),
                category: classify(&uasset.path),
                path: Some(uasset.path.clone()),
                payload: package.export_bundle,
            })?;
            if let Some(exports) = group.exports {
                writer.add_companion_name(entries[exports].path.clone());
            }
            for (chunk_type, index) in &group.bulk {
                let entry = &mut entries[*index];
                writer.add_chunk(PendingChunk {
                    id: ChunkId::package(package.package_id, *chunk_type),
                    category: classify(&entry.path),
                    path: Some(entry.path.clone()),
                    payload: mem::take(&mut entry.bytes),
                })?;
            }
            header.add_package(package.package_id, package.store_entry);
        }

        for index in &classification.loose {
            let entry = &mut entries[*index];
            debug!(path = %entry.path, "packaging loose file");
            writer.add_chunk(PendingChunk {
                id: loose_chunk_id(&entry.path),
                category: classify(&entry.path),
                path: Some(entry.path.clone()),
                payload: mem::take(&mut entry.bytes),
            })?;
        }

        for index in &classification.shader_libraries {
            let entry = &mut entries[*index];
            writer.add_chunk(PendingChunk {
                id: shader_library_id(&entry.path),
                category: classify(&entry.path),
                path: Some(entry.path.clone()),
                payload: mem::take(&mut entry.bytes),
            })?;
        }

        writer.add_chunk(PendingChunk {
            id: ChunkId::container_header(container_id),
            category: classify(CONTAINER_HEADER_RECORD),
            path: None,
            payload: header.to_bytes()?,
        })?;
        Ok(writer)
    }

    /// Writes every file raw into `<name>.pak`.
    fn build_archive(&self, name: String, entries: &[ExtractedEntry]) -> Result<BuildOutcome> {
        info!("only audio and movie files, writing a legacy archive");
        self.check_outputs(&name, &["pak"])?;
        self.enter(BuildStage::Writing)?;

        fs::create_dir_all(&self.options.output)?;
        let path = self.options.output.join(format!("{name}.pak"));
        let mut file = tempfile::Builder::new()
            .prefix(".modpak-")
            .tempfile_in(&self.options.output)?;
        {
            let mut pak = PakWriter::new(
                BufWriter::new(file.as_file_mut()),
                PakWriterOptions::builder()
                    .mount_point(self.options.mount_point.as_str())
                    .path_hash_seed(self.options.path_hash_seed)
                    .build(),
            );
            for entry in entries {
                pak.write_entry(&entry.path, &entry.bytes)?;
            }
            pak.finish()?.flush()?;
        }
        if self.context.is_cancelled() {
            return Err(modpak_iostore::error::Error::Cancelled.into());
        }
        file.persist(&path).map_err(|error| error.error)?;

        self.context.enter(BuildStage::Finalized);
        info!(pak = %path.display(), entries = entries.len(), "wrote archive");
        Ok(BuildOutcome {
            name,
            output: BuildOutput::Archive(path),
            converted: 0,
            skipped: Vec::new(),
            summary: report(self.context.tally()),
        })
    }
}
