use std::path::PathBuf;
use std::process::Command;

fn littlec() -> Command {
    Command::new(env!("CARGO_BIN_EXE_littlec"))
}

/// A scratch directory unique to this test process and test name.
fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("littlec-cli-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_cli_success() {
    let dir = scratch("success");
    let source = dir.join("program.little");
    let output = dir.join("program.bin");
    std::fs::write(&source, "func main()\nend\n").unwrap();

    let result = littlec().arg(&source).arg(&output).output().unwrap();
    assert_eq!(result.status.code(), Some(0));
    assert!(result.stdout.is_empty());

    // The image starts with the prologue's PUSH.
    let image = std::fs::read(&output).unwrap();
    assert_eq!(image[0], 0x0c);
}

#[test]
fn test_cli_compile_error() {
    let dir = scratch("compile-error");
    let source = dir.join("program.little");
    let output = dir.join("program.bin");
    std::fs::write(&source, "func main()\n  x = u8(1)\nend\n").unwrap();

    let result = littlec().arg(&source).arg(&output).output().unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(result.stdout, b"Compilation error (line 2)\n");
    // Nothing is written on failure.
    assert!(!output.exists());
}

#[test]
fn test_cli_unreadable_source() {
    let dir = scratch("unreadable");
    let source = dir.join("no-such-file.little");
    let output = dir.join("program.bin");

    let result = littlec().arg(&source).arg(&output).output().unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(result.stdout, b"Compilation error\n");
    assert!(!output.exists());
}

#[test]
fn test_cli_unwritable_output() {
    let dir = scratch("unwritable");
    let source = dir.join("program.little");
    let output = dir.join("no-such-dir").join("program.bin");
    std::fs::write(&source, "func main()\nend\n").unwrap();

    let result = littlec().arg(&source).arg(&output).output().unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(result.stdout, b"Compilation error\n");
}
