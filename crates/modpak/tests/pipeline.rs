use std::fs;
use std::path::Path;
use std::sync::Mutex;

use modpak::bridge::{AssetBridge, BridgeRequest, BridgeResponse};
use modpak::build::{BuildOptions, BuildOutput, Pipeline};
use modpak::context::{BuildContext, BuildStage};
use modpak::error::{Error, Result};
use modpak_asset::testing::LegacyPackageFixture;
use modpak_iostore::codec::ZlibCodec;
use modpak_iostore::planner::BLOCK_SIZE;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tracing_test::traced_test;

const BULK_SIZE: usize = 300 * 1024;

fn write(root: &Path, path: &str, data: &[u8]) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Three textures with 300 KiB of bulk data each, plus the chunk names of an earlier build
fn texture_mod(broken: Option<&str>) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in ["T_Hero_A", "T_Hero_B", "T_Hero_C"] {
        let mut fixture = LegacyPackageFixture::texture(&format!("/Game/Hero/{name}"), 256);
        if broken == Some(name) {
            // points one past the only export
            fixture.exports[0].serialize_before_serialize = vec![2];
        }
        let (uasset, uexp) = fixture.build();
        let bulk = (0..BULK_SIZE)
            .map(|i| (i / 512) as u8 ^ name.len() as u8)
            .collect::<Vec<_>>();

        write(dir.path(), &format!("Mod/Content/Hero/{name}.uasset"), &uasset);
        write(dir.path(), &format!("Mod/Content/Hero/{name}.uexp"), &uexp);
        write(dir.path(), &format!("Mod/Content/Hero/{name}.ubulk"), &bulk);
    }
    write(dir.path(), "chunknames", &[b'x'; 500]);
    dir
}

fn options(input: &Path, output: &Path) -> BuildOptions {
    BuildOptions::builder()
        .input(input)
        .output(output)
        .name("Mod")
        .build()
}

fn entry_count(utoc: &[u8]) -> u32 {
    u32::from_le_bytes(utoc[24..28].try_into().unwrap())
}

#[traced_test]
#[test]
fn bulk_blocks_are_counted_per_block() -> Result<()> {
    let input = texture_mod(None);
    let output = tempfile::tempdir()?;
    let codec = ZlibCodec::default();
    let context = BuildContext::new();

    let outcome = Pipeline::new(&options(input.path(), output.path()), &context)
        .with_codec(Some(&codec))
        .run()?;

    assert_eq!(outcome.name, "Mod_9999999_P");
    assert_eq!(outcome.converted, 3);
    assert!(outcome.skipped.is_empty());
    assert_eq!(context.stage(), BuildStage::Finalized);

    // 300 KiB is two full blocks and a partial one
    assert_eq!(BULK_SIZE.div_ceil(BLOCK_SIZE), 3);
    assert_eq!(outcome.summary.bulk, 9);
    assert_eq!(outcome.summary.shaders, 0);
    assert_eq!(
        outcome.summary.total,
        outcome.summary.bulk + outcome.summary.export
    );
    assert!(logs_contain(&format!(
        "IoStore compression summary: total_blocks_compressed={} bulk=9 shaders=0 export={}",
        outcome.summary.total, outcome.summary.export
    )));

    let BuildOutput::Container { files, stats } = &outcome.output else {
        panic!("expected a container");
    };
    // three export bundles, three bulk chunks and the container header
    assert_eq!(stats.chunks, 7);
    assert_eq!(entry_count(&fs::read(&files.utoc)?), 7);
    assert_eq!(fs::metadata(&files.ucas)?.len(), stats.ucas_size);

    let pak = fs::read(&files.pak)?;
    let names = b"Mod/Content/Hero/T_Hero_A.ubulk\nMod/Content/Hero/T_Hero_A.uexp";
    assert!(pak.windows(names.len()).any(|window| window == names));
    // the stale chunk names are not packaged
    assert!(!pak.windows(500).any(|window| window == [b'x'; 500]));
    Ok(())
}

#[traced_test]
#[test]
fn broken_asset_is_skipped() -> Result<()> {
    let input = texture_mod(Some("T_Hero_B"));
    let output = tempfile::tempdir()?;
    let codec = ZlibCodec::default();
    let context = BuildContext::new();

    let outcome = Pipeline::new(&options(input.path(), output.path()), &context)
        .with_codec(Some(&codec))
        .run()?;

    assert_eq!(outcome.converted, 2);
    assert_eq!(outcome.skipped, vec!["Mod/Content/Hero/T_Hero_B.uasset".to_string()]);
    assert!(logs_contain("skipping asset"));
    // the bulk data of the skipped asset is left out as well
    assert_eq!(outcome.summary.bulk, 6);

    let BuildOutput::Container { files, .. } = &outcome.output else {
        panic!("expected a container");
    };
    assert_eq!(entry_count(&fs::read(&files.utoc)?), 5);
    assert!(files.ucas.exists());
    assert!(files.pak.exists());
    Ok(())
}

#[test]
fn identical_input_gives_identical_output() -> Result<()> {
    let input = texture_mod(None);
    let codec = ZlibCodec::default();

    let build = || -> Result<(Vec<Vec<u8>>, String)> {
        let output = tempfile::tempdir()?;
        let context = BuildContext::new();
        let outcome = Pipeline::new(&options(input.path(), output.path()), &context)
            .with_codec(Some(&codec))
            .run()?;
        let BuildOutput::Container { files, .. } = outcome.output else {
            panic!("expected a container");
        };
        Ok((
            vec![fs::read(files.utoc)?, fs::read(files.ucas)?, fs::read(files.pak)?],
            outcome.summary.to_string(),
        ))
    };

    let (first_files, first_summary) = build()?;
    let (second_files, second_summary) = build()?;
    assert!(first_files == second_files);
    assert_eq!(first_summary, second_summary);
    Ok(())
}

#[test]
fn existing_output_is_kept() -> Result<()> {
    let input = texture_mod(None);
    let output = tempfile::tempdir()?;
    let options = options(input.path(), output.path());

    Pipeline::new(&options, &BuildContext::new()).run()?;
    let utoc = output.path().join("Mod_9999999_P.utoc");
    let before = fs::read(&utoc)?;

    assert!(matches!(
        Pipeline::new(&options, &BuildContext::new()).run(),
        Err(Error::OutputExists(path)) if path == utoc
    ));
    assert_eq!(fs::read(&utoc)?, before);

    let overwrite = BuildOptions {
        overwrite: true,
        ..options
    };
    Pipeline::new(&overwrite, &BuildContext::new()).run()?;
    Ok(())
}

#[test]
fn cancelled_build_writes_nothing() {
    let input = texture_mod(None);
    let output = tempfile::tempdir().unwrap();
    let context = BuildContext::new();
    context.cancel();

    let result = Pipeline::new(&options(input.path(), output.path()), &context).run();
    assert!(matches!(
        result,
        Err(Error::ContainerError(modpak_iostore::error::Error::Cancelled))
    ));
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
}

#[test]
fn empty_input_is_an_error() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let result = Pipeline::new(&options(input.path(), output.path()), &BuildContext::new()).run();
    assert!(matches!(result, Err(Error::EmptyInput(_))));
}

#[traced_test]
#[test]
fn audio_mods_become_an_archive() -> Result<()> {
    let input = tempfile::tempdir()?;
    write(input.path(), "Mod/Content/WwiseAudio/Hero.bnk", b"BKHD");
    write(input.path(), "Mod/Content/WwiseAudio/Media/1234.wem", &[7; 2048]);
    let output = tempfile::tempdir()?;

    let outcome = Pipeline::new(&options(input.path(), output.path()), &BuildContext::new()).run()?;
    assert_eq!(
        outcome.output,
        BuildOutput::Archive(output.path().join("Mod_9999999_P.pak"))
    );
    assert_eq!(fs::read_dir(output.path())?.count(), 1);
    assert!(logs_contain("total_blocks_compressed=0"));

    let pak = fs::read(output.path().join("Mod_9999999_P.pak"))?;
    assert!(pak.windows(2048).any(|window| window == [7; 2048]));
    Ok(())
}

/// Remembers the action and file of every request
#[derive(Default)]
struct RecordingBridge {
    requests: Mutex<Vec<(String, String)>>,
}

impl RecordingBridge {
    fn files(&self, action: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == action)
            .map(|(_, file)| file.clone())
            .collect()
    }
}

impl AssetBridge for RecordingBridge {
    fn is_available(&self) -> bool {
        true
    }

    fn request(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((request.action.clone(), request.file_path.clone()));
        Ok(BridgeResponse {
            success: true,
            message: None,
            data: None,
        })
    }
}

#[test]
fn textures_go_through_the_bridge() -> Result<()> {
    let input = texture_mod(None);
    let output = tempfile::tempdir()?;
    let options = BuildOptions {
        fix_textures: true,
        ..options(input.path(), output.path())
    };
    let bridge = RecordingBridge::default();

    let outcome = Pipeline::new(&options, &BuildContext::new())
        .with_bridge(Some(&bridge))
        .run()?;
    assert_eq!(outcome.converted, 3);

    let files = bridge.files("set_no_mipmaps");
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|file| file.ends_with(".uasset")));
    assert!(bridge.files("patch_mesh").is_empty());
    assert!(input
        .path()
        .join("Mod/Content/Hero/T_Hero_A.uasset.bak")
        .exists());
    Ok(())
}

#[traced_test]
#[test]
fn missing_bridge_only_warns() -> Result<()> {
    let input = texture_mod(None);
    let output = tempfile::tempdir()?;
    let options = BuildOptions {
        fix_textures: true,
        ..options(input.path(), output.path())
    };

    let outcome = Pipeline::new(&options, &BuildContext::new()).run()?;
    assert_eq!(outcome.converted, 3);
    assert!(logs_contain("textures are packaged unchanged"));
    Ok(())
}

/// The texture mod plus a skeletal mesh
fn mesh_mod() -> TempDir {
    let dir = texture_mod(None);
    let (uasset, uexp) =
        LegacyPackageFixture::asset("/Game/Hero/SK_Hero", "SkeletalMesh", 512).build();
    write(dir.path(), "Mod/Content/Hero/SK_Hero.uasset", &uasset);
    write(dir.path(), "Mod/Content/Hero/SK_Hero.uexp", &uexp);
    dir
}

#[test]
fn meshes_go_through_the_bridge() -> Result<()> {
    let input = mesh_mod();
    let output = tempfile::tempdir()?;
    let options = BuildOptions {
        fix_meshes: true,
        ..options(input.path(), output.path())
    };
    let bridge = RecordingBridge::default();

    let outcome = Pipeline::new(&options, &BuildContext::new())
        .with_bridge(Some(&bridge))
        .run()?;
    assert_eq!(outcome.converted, 4);

    let files = bridge.files("patch_mesh");
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("SK_Hero.uasset"));
    // textures are only touched when asked for
    assert!(bridge.files("set_no_mipmaps").is_empty());
    assert!(input
        .path()
        .join("Mod/Content/Hero/SK_Hero.uasset.bak")
        .exists());
    assert!(!input
        .path()
        .join("Mod/Content/Hero/T_Hero_A.uasset.bak")
        .exists());
    Ok(())
}

#[test]
fn meshes_and_textures_are_fixed_together() -> Result<()> {
    let input = mesh_mod();
    let output = tempfile::tempdir()?;
    let options = BuildOptions {
        fix_meshes: true,
        fix_textures: true,
        ..options(input.path(), output.path())
    };
    let bridge = RecordingBridge::default();

    Pipeline::new(&options, &BuildContext::new())
        .with_bridge(Some(&bridge))
        .run()?;
    assert_eq!(bridge.files("patch_mesh").len(), 1);
    assert_eq!(bridge.files("set_no_mipmaps").len(), 3);
    Ok(())
}

#[traced_test]
#[test]
fn missing_bridge_leaves_meshes_unchanged() -> Result<()> {
    let input = mesh_mod();
    let output = tempfile::tempdir()?;
    let options = BuildOptions {
        fix_meshes: true,
        ..options(input.path(), output.path())
    };

    let outcome = Pipeline::new(&options, &BuildContext::new()).run()?;
    assert_eq!(outcome.converted, 4);
    assert!(logs_contain("meshes are packaged unchanged"));
    assert!(!logs_contain("textures are packaged unchanged"));
    assert!(!input
        .path()
        .join("Mod/Content/Hero/SK_Hero.uasset.bak")
        .exists());
    Ok(())
}
