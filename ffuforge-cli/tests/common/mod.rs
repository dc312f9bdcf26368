#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestContext {
    pub cmd: Command,
    pub dir: TempDir,
}

impl TestContext {
    /// Fresh command sharing this context's work directory.
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_ffuforge");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        cmd.arg("--work-dir").arg(self.work_dir());
        cmd
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// A base image file that exists.
    pub fn base_image(&self) -> PathBuf {
        let path = self.dir.path().join("install.wim");
        std::fs::write(&path, b"wim").expect("Failed to write base image");
        path
    }

    /// Write a config file with `extra` JSON fields merged over a valid
    /// direct-capture build.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let image = self.base_image();
        let mut body = format!(
            "{{\"base_image\": {}",
            serde_json::to_string(&image).expect("Failed to encode path")
        );
        if !extra.is_empty() {
            body.push_str(", ");
            body.push_str(extra);
        }
        body.push('}');
        let path = self.dir.path().join("build.json");
        std::fs::write(&path, body).expect("Failed to write config");
        path
    }
}

pub fn ffuforge() -> TestContext {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let bin_path: &str = env!("CARGO_BIN_EXE_ffuforge");
    let mut cmd = Command::new(bin_path);
    cmd.timeout(Duration::from_secs(30));
    cmd.arg("--work-dir").arg(dir.path().join("work"));
    TestContext { cmd, dir }
}
