#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use memtriage_engine::{InvocationOutcome, Invoker, ProcessInvoker, ToolCommand};
use tokio_util::sync::CancellationToken;

/// Fake memory-analysis framework.
///
/// Plugin name is the fifth argument (`-f <image> -r json <plugin>`).
pub const FAKE_VOL: &str = r#"
if [ "$1" = "--help" ]; then
  echo "Volatility 3 Framework 2.5.2"
  echo "usage: vol [-h] [-f FILE] [-r RENDERER] plugin ..."
  exit 0
fi
if [ "$3" = "banners.Banners" ]; then
  printf 'Offset\tBanner\n0x3a00000\tMicrosoft Windows [Version 10.0.19041]\n'
  exit 0
fi
case "$5" in
  windows.pslist)
    printf '{"PID": 4, "ImageFileName": "System"}\n{truncated\n\n{"PID": 88, "ImageFileName": "smss.exe"}\n'
    ;;
  windows.netscan)
    echo "Volatility 3 Framework 2.5.2" >&2
    echo "Unable to validate the plugin requirements: ['kernel.symbol_table_name']" >&2
    exit 1
    ;;
  windows.cmdline)
    echo "something odd happened" >&2
    echo "second line" >&2
    exit 2
    ;;
  slow.*)
    exec sleep 10
    ;;
  forking.*)
    ( sleep 1; touch "$2.leftover" ) &
    exec sleep 10
    ;;
  *)
    printf '{"plugin": "%s"}\n' "$5"
    ;;
esac
"#;

/// Fake signature scanner; honours `-e -C <dir>`.
pub const FAKE_BINWALK: &str = r#"
if [ "$1" = "--help" ]; then
  echo ""
  echo "Binwalk v2.3.4"
  exit 0
fi
if [ "$1" = "-e" ]; then
  mkdir -p "$3/_carved.extracted/nested"
  echo zlib > "$3/_carved.extracted/29"
  echo png > "$3/_carved.extracted/nested/0.png"
  shift 3
fi
if [ ! -f "$1" ]; then
  echo "General Error: Cannot open file $1" >&2
  exit 1
fi
echo ""
echo "DECIMAL       HEXADECIMAL     DESCRIPTION"
echo "--------------------------------------------------------------------------------"
echo "0             0x0             PNG image, 1920 x 1080, 8-bit/color RGBA"
echo "41            0x29            Zlib compressed data, default compression"
"#;

/// Fake metadata extractor; the file is the fifth argument.
pub const FAKE_EXIFTOOL: &str = r#"
if [ "$1" = "-ver" ]; then
  echo "12.76"
  exit 0
fi
if [ ! -f "$5" ]; then
  echo "Error: File not found - $5" >&2
  exit 1
fi
printf '[{"SourceFile": "%s", "File": {"FileType": "PNG", "MIMEType": "image/png"}, "PNG": {"ImageWidth": 1920, "ImageHeight": 1080}}]\n' "$5"
"#;

pub fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_image(dir: &Path) -> PathBuf {
    let path = dir.join("memory.raw");
    std::fs::write(&path, b"not really a memory image").unwrap();
    path
}

/// Wraps [`ProcessInvoker`] and counts launches.
#[derive(Default)]
pub struct CountingInvoker {
    spawns: AtomicUsize,
}

impl CountingInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Invoker for CountingInvoker {
    async fn invoke(&self, command: &ToolCommand, cancel: &CancellationToken) -> InvocationOutcome {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        ProcessInvoker.invoke(command, cancel).await
    }
}
