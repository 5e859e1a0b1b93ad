//! End-to-end tests of the ipos-crypt binary.

use std::path::Path;
use std::process::{Command, Output};

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const MASTER_KEY: &str =
    "my-key:6368616e676520746869732070617373776f726420746f206120736563726574";

fn ipos_crypt(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ipos-crypt"))
        .args(args)
        .env("IPOS_CRYPT_KEY", KEY)
        .env("IPOS_KMS_MASTER_KEY", MASTER_KEY)
        .env_remove("IPOS_KMS_CONFIG")
        .output()
        .expect("run ipos-crypt")
}

fn ok(args: &[&str]) -> String {
    let out = ipos_crypt(args);
    assert!(
        out.status.success(),
        "ipos-crypt {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).unwrap()
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn encrypt_decrypt_file() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let enc = dir.path().join("enc");
    let dec = dir.path().join("dec");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&plain, &data).unwrap();

    ok(&["encrypt", "-i", path(&plain), "-o", path(&enc)]);
    let ciphertext = std::fs::read(&enc).unwrap();
    assert_eq!(ciphertext.len(), 200_128);
    assert_eq!(ciphertext[0], 0x20);

    ok(&["decrypt", "-i", path(&enc), "-o", path(&dec)]);
    assert_eq!(std::fs::read(&dec).unwrap(), data);

    ok(&["decrypt", "-i", path(&enc), "-o", path(&dec), "--offset", "65000", "--length", "70000"]);
    assert_eq!(std::fs::read(&dec).unwrap(), &data[65_000..135_000]);

    // length past the end is clamped
    ok(&["decrypt", "-i", path(&enc), "-o", path(&dec), "--offset", "199990", "--length", "100"]);
    assert_eq!(std::fs::read(&dec).unwrap(), &data[199_990..]);
}

#[test]
fn range_decrypt_rejects_stream_cut_at_package_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let enc = dir.path().join("enc");
    let dec = dir.path().join("dec");
    std::fs::write(&plain, vec![3u8; 3 * 65_536 + 5]).unwrap();
    ok(&["encrypt", "-i", path(&plain), "-o", path(&enc)]);

    let ciphertext = std::fs::read(&enc).unwrap();
    std::fs::write(&enc, &ciphertext[..3 * 65_568]).unwrap();

    let out = ipos_crypt(&["decrypt", "-i", path(&enc), "-o", path(&dec), "--offset", "0"]);
    assert!(!out.status.success());
    let out = ipos_crypt(&["decrypt", "-i", path(&enc), "-o", "-", "--offset", "196000"]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());

    // A range that stops short of the end is not affected by the cut.
    ok(&["decrypt", "-i", path(&enc), "-o", path(&dec), "--offset", "0", "--length", "1000"]);
    assert_eq!(std::fs::read(&dec).unwrap(), vec![3u8; 1000]);
}

#[test]
fn encrypt_v1_chacha() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let enc = dir.path().join("enc");
    let dec = dir.path().join("dec");
    std::fs::write(&plain, b"hello dare").unwrap();

    ok(&[
        "encrypt", "-i", path(&plain), "-o", path(&enc), "--dare", "v1", "--cipher",
        "chacha20-poly1305",
    ]);
    let ciphertext = std::fs::read(&enc).unwrap();
    assert_eq!(ciphertext[0], 0x10);
    assert_eq!(ciphertext[1], 0x01);

    ok(&["decrypt", "-i", path(&enc), "-o", path(&dec)]);
    assert_eq!(std::fs::read(&dec).unwrap(), b"hello dare");
}

#[test]
fn decrypt_with_wrong_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let enc = dir.path().join("enc");
    std::fs::write(&plain, b"secret").unwrap();
    ok(&["encrypt", "-i", path(&plain), "-o", path(&enc)]);

    let wrong = "ff".repeat(32);
    let out = ipos_crypt(&["decrypt", "-i", path(&enc), "-o", "-", "--key", &wrong]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn size_math() {
    assert_eq!(ok(&["size", "encrypted", "200000"]).trim(), "200128");
    assert_eq!(ok(&["size", "decrypted", "200128"]).trim(), "200000");
    assert!(!ipos_crypt(&["size", "decrypted", "65569"]).status.success());
}

#[test]
fn kms_generate_and_unseal() {
    let out = ok(&["kms", "generate", "--context", "bucket=bucket/object"]);
    let generated: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(generated["key_id"], "my-key");
    let sealed = generated["ciphertext"].as_str().unwrap();

    let out = ok(&["kms", "unseal", "--context", "bucket=bucket/object", "--sealed", sealed]);
    let unsealed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(unsealed["plaintext"], generated["plaintext"]);

    let out = ipos_crypt(&["kms", "unseal", "--context", "bucket=bucket/other", "--sealed", sealed]);
    assert!(!out.status.success());
}

#[test]
fn kms_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("ipos.toml");
    std::fs::write(
        &config,
        "[master_key]\nkey_id = \"file-key\"\nkey = \"6368616e676520746869732070617373776f726420746f206120736563726574\"\n",
    )
    .unwrap();

    let out = ok(&["kms", "--config", path(&config), "info"]);
    let info: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(info["auth_type"], "master-key");

    let out = ok(&["kms", "--config", path(&config), "generate"]);
    let generated: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(generated["key_id"], "file-key");
}
