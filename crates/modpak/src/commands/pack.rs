use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, Result};
use modpak_iostore::CompressionMethod;
use tracing::{info, warn};

use crate::bridge::{AssetBridge, ProcessBridge};
use crate::build::{load_codec, BuildOptions, BuildOutput, Pipeline};
use crate::context::BuildContext;

#[derive(Args)]
pub struct PackArgs {
    /// Directory holding the extracted mod files
    #[arg(short, long, value_name = "DIR")]
    input: PathBuf,

    /// Directory the container is written to
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Name of the mod, defaults to the name of the input directory
    #[arg(short, long)]
    name: Option<String>,

    /// Codec for compressed blocks: oodle, zlib or none
    #[arg(long, default_value = "oodle")]
    compression: CompressionMethod,

    /// Path of the Oodle library, by default the copy next to this binary or the system one
    #[arg(long, value_name = "FILE", env = "MODPAK_OODLE_PATH")]
    oodle: Option<PathBuf>,

    /// Mount point of the container and its archive
    #[arg(long, default_value = "../../../")]
    mount_point: String,

    /// Seed of the archive's path hash index
    #[arg(long, default_value_t = 0)]
    path_hash_seed: u64,

    /// Turn off texture mipmaps through the asset bridge before packaging
    #[arg(long, default_value_t = false)]
    fix_textures: bool,

    /// Patch skeletal and static meshes through the asset bridge before packaging
    #[arg(long, default_value_t = false)]
    fix_meshes: bool,

    /// Asset bridge executable, defaults to the one next to this program
    #[arg(long, value_name = "FILE", env = "MODPAK_BRIDGE")]
    bridge: Option<PathBuf>,

    /// Allow overwriting existing output files
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    fn name(&self) -> Result<String> {
        match &self.name {
            Some(name) => Ok(name.clone()),
            None => self
                .input
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .ok_or(miette!(
                    "unable to derive a name from {}, pass --name",
                    self.input.display()
                )),
        }
    }

    pub fn handle(&self) -> Result<()> {
        info!("packing {}", self.input.display());

        let options = BuildOptions::builder()
            .input(self.input.as_path())
            .output(self.output.as_path())
            .name(self.name()?)
            .mount_point(self.mount_point.as_str())
            .path_hash_seed(self.path_hash_seed)
            .fix_textures(self.fix_textures)
            .fix_meshes(self.fix_meshes)
            .overwrite(self.overwrite)
            .build();

        let codec = match load_codec(self.compression, self.oodle.as_deref()) {
            Ok(codec) => codec,
            Err(error) => {
                warn!(%error, "storing every block raw");
                None
            }
        };
        let bridge = match &self.bridge {
            Some(executable) => Some(ProcessBridge::new(executable)),
            None => ProcessBridge::locate(),
        };

        let context = BuildContext::new();
        let outcome = Pipeline::new(&options, &context)
            .with_codec(codec.as_deref())
            .with_bridge(bridge.as_ref().map(|bridge| bridge as &dyn AssetBridge))
            .run()
            .context(format!("packing {}", self.input.display()))?;

        match &outcome.output {
            BuildOutput::Container { files, .. } => info!("wrote {}", files.utoc.display()),
            BuildOutput::Archive(path) => info!("wrote {}", path.display()),
        }
        if !outcome.skipped.is_empty() {
            warn!(
                "{} assets were left out: {}",
                outcome.skipped.len(),
                outcome.skipped.join(", ")
            );
        }

        Ok(())
    }
}
