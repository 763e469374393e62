use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_deltafile").to_string()
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7) ^ (i >> 5)) as u8).collect()
}

#[test]
fn cli_encode_decode_roundtrip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("source.bin");
    let target = dir.path().join("target.bin");
    let delta = dir.path().join("delta.vcdiff");
    let output = dir.path().join("output.bin");

    std::fs::write(&source, b"abcde12345abcde12345").unwrap();
    std::fs::write(&target, b"abcdeXXXXXabcde12345!").unwrap();

    let st = Command::new(bin())
        .arg("--force")
        .args(["encode", "--source"])
        .arg(&source)
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let st = Command::new(bin())
        .arg("--force")
        .args(["decode", "--source"])
        .arg(&source)
        .arg(&delta)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(
        std::fs::read(&output).unwrap(),
        std::fs::read(&target).unwrap()
    );
}

#[test]
fn cli_small_windows_roundtrip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("v1");
    let target = dir.path().join("v2");
    let delta = dir.path().join("v2.vcdiff");
    let output = dir.path().join("v2.out");

    let v1 = sample(50_000);
    let mut v2 = v1.clone();
    v2[10_000..10_050].fill(b'#');
    std::fs::write(&source, &v1).unwrap();
    std::fs::write(&target, &v2).unwrap();

    let window = ["--window-size", "4K", "--source-windows", "2", "--pool-capacity", "3"];
    let st = Command::new(bin())
        .args(["encode", "-s"])
        .arg(&source)
        .args(window)
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());
    assert!(std::fs::metadata(&delta).unwrap().len() < 5_000);

    let st = Command::new(bin())
        .args(["decode", "-s"])
        .arg(&source)
        .args(window)
        .arg(&delta)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(std::fs::read(&output).unwrap(), v2);
}

#[test]
fn cli_pipes_through_stdin_and_stdout() {
    let payload = b"piped payload, piped payload, piped payload".repeat(20);

    let mut child = Command::new(bin())
        .arg("encode")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(&payload).unwrap();
    let encoded = child.wait_with_output().unwrap();
    assert!(encoded.status.success());
    assert_eq!(&encoded.stdout[..4], &[0xD6, 0xC3, 0xC4, 0x00]);

    let mut child = Command::new(bin())
        .arg("decode")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(&encoded.stdout).unwrap();
    let decoded = child.wait_with_output().unwrap();
    assert!(decoded.status.success());
    assert_eq!(decoded.stdout, payload);
}

#[test]
fn cli_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.vcdiff");
    std::fs::write(&input, b"payload").unwrap();
    std::fs::write(&output, b"keep me").unwrap();

    let out = Command::new(bin())
        .arg("encode")
        .arg(&input)
        .arg(&output)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("-f"));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");

    let st = Command::new(bin())
        .args(["-f", "encode"])
        .arg(&input)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_ne!(std::fs::read(&output).unwrap(), b"keep me");
}

#[test]
fn cli_rejects_corrupt_delta() {
    let dir = tempdir().unwrap();
    let delta = dir.path().join("bad.vcdiff");
    std::fs::write(&delta, b"definitely not vcdiff").unwrap();

    let out = Command::new(bin())
        .args(["decode", "-c"])
        .arg(&delta)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("malformed delta"));
}

#[test]
fn cli_headers_lists_windows() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let delta = dir.path().join("in.vcdiff");
    std::fs::write(&input, sample(10_000)).unwrap();

    let st = Command::new(bin())
        .args(["encode", "-W", "4K", "--source-windows", "1", "--pool-capacity", "2"])
        .arg(&input)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin()).arg("headers").arg(&delta).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert_eq!(text.matches("VCDIFF window number:").count(), 3);
    assert!(text.contains("VCDIFF target window offset:  8192"));
    assert!(text.contains("VCD_ADLER32"));
}

#[test]
fn cli_json_stats() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let delta = dir.path().join("in.vcdiff");
    std::fs::write(&input, sample(3000)).unwrap();

    let out = Command::new(bin())
        .args(["--json", "encode"])
        .arg(&input)
        .arg(&delta)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(stats["command"], "encode");
    assert_eq!(stats["plain_size"], 3000);
    assert_eq!(stats["windows"], 1);
    assert_eq!(
        stats["delta_size"],
        std::fs::metadata(&delta).unwrap().len()
    );
}

#[test]
fn cli_config_works() {
    let out = Command::new(bin()).arg("config").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stderr);
    assert!(text.contains("DEFAULT_WINDOW_SIZE="));
    assert!(text.contains("DEFAULT_POOL_CAPACITY="));
}

#[test]
fn cli_rejects_invalid_window_size() {
    let out = Command::new(bin())
        .args(["encode", "-c", "--window-size", "10"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid configuration"));
}
