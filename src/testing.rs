use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

const ETXTBSY: i32 = 26;

/// Stands in for ffmpeg: writes a small palette for the palette pass, and
/// for the gif pass reports six frames on stdout before writing 5000 bytes.
pub const FFMPEG_SCRIPT: &str = r#"for last; do :; done
case "$*" in
  *palettegen*) printf 'PNG palette' > "$last" ;;
  *)
    n=1
    while [ $n -le 6 ]; do
      echo "frame=$n"
      echo "fps=12.0"
      echo "progress=continue"
      n=$((n + 1))
    done
    echo "frame=6"
    echo "progress=end"
    head -c 5000 /dev/zero > "$last"
    ;;
esac"#;

/// Writes an executable `sh` script named `name` into `dir`.
///
/// Every script exits straight away when called with `--ready`. That call is
/// retried until the kernel stops reporting ETXTBSY, which happens while a
/// process forked by another test thread still holds our write handle.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n[ \"$1\" = --ready ] && exit 0\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    for _ in 0..100 {
        match Command::new(&path).arg("--ready").status() {
            Ok(status) => {
                assert!(status.success());
                return path;
            },
            Err(err) if err.raw_os_error() == Some(ETXTBSY) => thread::sleep(Duration::from_millis(10)),
            Err(err) => panic!("{:?}: {}", path, err),
        }
    }
    panic!("{:?} stayed busy", path);
}
