//! Optional helper process editing cooked assets in place.
//!
//! The helper reads one JSON request from stdin and answers with one JSON line on stdout:
//!
//! ```text
//! > {"action":"set_no_mipmaps","file_path":"Mod/Content/T_Hero.uasset"}
//! < {"success":true,"message":"mipmaps disabled","data":null}
//! ```
//!
//! Builds never depend on it. When it is missing or fails, the asset is packaged unchanged.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

/// File name the helper is looked up by next to the running executable
pub const BRIDGE_EXECUTABLE: &str = if cfg!(windows) {
    "UAssetBridge.exe"
} else {
    "UAssetBridge"
};

/// Action disabling mipmap generation of a texture
pub const SET_NO_MIPMAPS: &str = "set_no_mipmaps";

/// Action patching a skeletal or static mesh for the current engine build
pub const PATCH_MESH: &str = "patch_mesh";

/// Edits the helper applies to cooked assets before they are packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFix {
    NoMipmaps,
    MeshPatch,
}

impl AssetFix {
    pub fn action(self) -> &'static str {
        match self {
            AssetFix::NoMipmaps => SET_NO_MIPMAPS,
            AssetFix::MeshPatch => PATCH_MESH,
        }
    }

    /// Whether assets of the class `class` are edited by this fix
    pub fn applies_to(self, class: &str) -> bool {
        match self {
            AssetFix::NoMipmaps => class.starts_with("Texture"),
            AssetFix::MeshPatch => matches!(class, "SkeletalMesh" | "StaticMesh"),
        }
    }

    /// What the fixed assets are called in logs
    pub fn subject(self) -> &'static str {
        match self {
            AssetFix::NoMipmaps => "textures",
            AssetFix::MeshPatch => "meshes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeRequest {
    pub action: String,
    pub file_path: String,
}

impl BridgeRequest {
    pub fn new(action: impl Into<String>, file_path: &Path) -> Self {
        BridgeRequest {
            action: action.into(),
            file_path: file_path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Something that can edit assets for the build
pub trait AssetBridge: Send + Sync {
    /// Whether requests can be sent at all. Checked once before any request.
    fn is_available(&self) -> bool;

    fn request(&self, request: &BridgeRequest) -> Result<BridgeResponse>;
}

/// Runs the helper executable once per request
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    executable: PathBuf,
}

impl ProcessBridge {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        ProcessBridge {
            executable: executable.into(),
        }
    }

    /// The helper shipped next to the running executable, if there is one.
    pub fn locate() -> Option<Self> {
        let executable = std::env::current_exe().ok()?.parent()?.join(BRIDGE_EXECUTABLE);
        executable.is_file().then(|| ProcessBridge::new(executable))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl AssetBridge for ProcessBridge {
    fn is_available(&self) -> bool {
        self.executable.is_file()
    }

    #[instrument(skip(self), fields(action = request.action.as_str()), err)]
    fn request(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        let mut child = Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::BridgeError("no stdin".into()))?;
            serde_json::to_writer(&mut stdin, request)?;
            stdin.write_all(b"\n")?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::BridgeError(format!(
                "{} exited with {}: {}",
                self.executable.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| Error::BridgeError("no response".into()))?;
        Ok(serde_json::from_str(line)?)
    }
}

/// Where the original of an edited asset is kept
pub fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    PathBuf::from(backup)
}

/// Applies `fix` to the asset at `path`, keeping a `.bak` copy of the original.
///
/// Returns whether the helper changed the asset.
pub fn apply_fix(bridge: &dyn AssetBridge, fix: AssetFix, path: &Path) -> Result<bool> {
    fs::copy(path, backup_path(path))?;

    let response = bridge.request(&BridgeRequest::new(fix.action(), path))?;
    if response.success {
        debug!(
            path = %path.display(),
            action = fix.action(),
            message = response.message.as_deref(),
            "asset fixed"
        );
    } else {
        warn!(
            path = %path.display(),
            action = fix.action(),
            message = response.message.as_deref().unwrap_or("no message"),
            "asset left unchanged"
        );
    }
    Ok(response.success)
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::bridge::{
        apply_fix, backup_path, AssetBridge, AssetFix, BridgeRequest, BridgeResponse, ProcessBridge,
    };
    use crate::error::Result;

    #[derive(Default)]
    struct RecordingBridge {
        requests: Mutex<Vec<BridgeRequest>>,
        succeed: bool,
    }

    impl AssetBridge for RecordingBridge {
        fn is_available(&self) -> bool {
            true
        }

        fn request(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(BridgeResponse {
                success: self.succeed,
                message: Some("not a texture".into()),
                data: None,
            })
        }
    }

    #[test]
    fn request_serialization() {
        let request = BridgeRequest::new("set_no_mipmaps", "Mod/T.uasset".as_ref());
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"action":"set_no_mipmaps","file_path":"Mod/T.uasset"}"#
        );

        let response: BridgeResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.message, None);
    }

    #[traced_test]
    #[test]
    fn fixing_keeps_a_backup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let texture = dir.path().join("T_Hero.uasset");
        fs::write(&texture, b"original")?;

        let mesh = dir.path().join("SK_Hero.uasset");
        fs::write(&mesh, b"mesh")?;

        let bridge = RecordingBridge::default();
        assert!(!apply_fix(&bridge, AssetFix::NoMipmaps, &texture)?);
        assert!(!apply_fix(&bridge, AssetFix::MeshPatch, &mesh)?);
        assert_eq!(fs::read(backup_path(&texture))?, b"original");
        assert_eq!(fs::read(backup_path(&mesh))?, b"mesh");
        assert!(backup_path(&texture).ends_with("T_Hero.uasset.bak"));

        let requests = bridge.requests.lock().unwrap();
        assert_eq!(requests[0].action, "set_no_mipmaps");
        assert_eq!(requests[1].action, "patch_mesh");
        assert!(logs_contain("asset left unchanged"));
        Ok(())
    }

    #[test]
    fn fixes_pick_their_asset_classes() {
        assert!(AssetFix::NoMipmaps.applies_to("Texture2D"));
        assert!(AssetFix::NoMipmaps.applies_to("TextureCube"));
        assert!(!AssetFix::NoMipmaps.applies_to("SkeletalMesh"));
        assert!(AssetFix::MeshPatch.applies_to("SkeletalMesh"));
        assert!(AssetFix::MeshPatch.applies_to("StaticMesh"));
        assert!(!AssetFix::MeshPatch.applies_to("SkeletalMeshSocket"));
        assert!(!AssetFix::MeshPatch.applies_to("Texture2D"));
    }

    #[test]
    fn missing_executable_is_unavailable() {
        let bridge = ProcessBridge::new("/nonexistent/UAssetBridge");
        assert!(!bridge.is_available());
        assert!(bridge
            .request(&BridgeRequest::new("set_no_mipmaps", "T.uasset".as_ref()))
            .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn process_bridge_round_trip() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("bridge.sh");
        fs::write(
            &script,
            "#!/bin/sh\nread request\ncase \"$request\" in\n  *set_no_mipmaps*) echo '{\"success\":true,\"message\":\"mipmaps disabled\",\"data\":null}' ;;\n  *) echo '{\"success\":false,\"message\":\"unknown action\"}' ;;\nesac\n",
        )?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        let bridge = ProcessBridge::new(&script);
        assert!(bridge.is_available());

        let response = bridge.request(&BridgeRequest::new("set_no_mipmaps", "T.uasset".as_ref()))?;
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("mipmaps disabled"));

        let response = bridge.request(&BridgeRequest::new("rename", "T.uasset".as_ref()))?;
        assert!(!response.success);
        Ok(())
    }
}
