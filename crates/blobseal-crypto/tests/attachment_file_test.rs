//! File-level tests: attachments written to disk, decrypted, tampered with,
//! and re-encrypted through a seekable handle.

use std::path::{Path, PathBuf};

use blobseal_crypto::{
    decrypt_attachment, decrypt_file, decrypt_file_without_validating, encrypt_attachment,
    encrypt_file, open_attachment_handle, open_file_handle, padded_size, reencrypt, sha256_file,
    validate_attachment, validate_file, CombinedKey, CryptoError, EncryptionMetadata, BLOCK_LEN,
    CRYPTO_OVERHEAD, MAC_LEN,
};
use tempfile::TempDir;

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8).collect()
}

fn flip_byte(path: &Path, index: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[index] ^= 0x40;
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_attachment_roundtrip_on_disk() {
    let tmp = TempDir::new().unwrap();
    let data = make_data(100_000);
    let input = write_test_file(tmp.path(), "photo.jpg", &data);
    let sealed = tmp.path().join("photo.enc");
    let output = tmp.path().join("photo.out");

    let metadata = encrypt_attachment(&input, &sealed, None).unwrap();

    let container_len = std::fs::metadata(&sealed).unwrap().len();
    let bucket = padded_size(data.len() as u64);
    let expected_len = CRYPTO_OVERHEAD as u64 + (bucket / BLOCK_LEN as u64 + 1) * BLOCK_LEN as u64;
    assert_eq!(container_len, expected_len);
    assert_eq!(metadata.length, Some(container_len));
    assert_eq!(metadata.digest, Some(sha256_file(&sealed).unwrap()));

    assert!(validate_attachment(&sealed, &metadata));
    let written = decrypt_attachment(&sealed, &metadata, &output).unwrap();
    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[test]
fn test_plain_file_roundtrip_with_supplied_key() {
    let tmp = TempDir::new().unwrap();
    let data = make_data(4097);
    let input = write_test_file(tmp.path(), "notes.txt", &data);
    let sealed = tmp.path().join("notes.enc");
    let output = tmp.path().join("notes.out");

    let key = CombinedKey::generate();
    let metadata = encrypt_file(&input, &sealed, Some(key.clone())).unwrap();
    assert_eq!(*metadata.key.to_bytes(), *key.to_bytes());

    // Key-only metadata: PKCS#7 determines the length, no digest to check.
    let key_only = EncryptionMetadata::with_key(key);
    decrypt_file(&sealed, &key_only, &output).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), data);

    let mut handle = open_file_handle(&sealed, &metadata.key).unwrap();
    assert_eq!(handle.plaintext_length(), data.len() as u64);
    handle.seek(4000).unwrap();
    assert_eq!(handle.read(1000).unwrap(), &data[4000..]);
}

#[test]
fn test_tampered_attachment_removes_output() {
    let tmp = TempDir::new().unwrap();
    let input = write_test_file(tmp.path(), "doc.pdf", &make_data(3000));
    let sealed = tmp.path().join("doc.enc");
    let output = tmp.path().join("doc.out");

    let metadata = encrypt_attachment(&input, &sealed, None).unwrap();
    flip_byte(&sealed, 200);

    assert!(!validate_attachment(&sealed, &metadata));
    let err = decrypt_attachment(&sealed, &metadata, &output).unwrap_err();
    assert!(matches!(err, CryptoError::BadMac), "{err}");
    assert!(!output.exists(), "partial plaintext must not survive a failed check");
}

#[test]
fn test_tampered_mac_is_ignored_without_validation() {
    let tmp = TempDir::new().unwrap();
    let data = make_data(900);
    let input = write_test_file(tmp.path(), "clip.bin", &data);
    let sealed = tmp.path().join("clip.enc");
    let output = tmp.path().join("clip.out");

    let metadata = encrypt_attachment(&input, &sealed, None).unwrap();
    let len = std::fs::metadata(&sealed).unwrap().len() as usize;
    flip_byte(&sealed, len - MAC_LEN / 2);

    assert!(!validate_file(&sealed, &metadata));
    decrypt_file_without_validating(&sealed, &metadata, &output).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[test]
fn test_claimed_length_mismatch_removes_output() {
    let tmp = TempDir::new().unwrap();
    let input = write_test_file(tmp.path(), "short.bin", &make_data(64));
    let sealed = tmp.path().join("short.enc");
    let output = tmp.path().join("short.out");

    let mut metadata = encrypt_file(&input, &sealed, None).unwrap();
    metadata.plaintext_length = Some(65);

    let err = decrypt_file(&sealed, &metadata, &output).unwrap_err();
    assert!(
        matches!(
            err,
            CryptoError::IncorrectPlaintextLength {
                expected: 65,
                actual: 64
            }
        ),
        "{err}"
    );
    assert!(!output.exists());
}

#[test]
fn test_missing_input_leaves_no_output() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.bin");
    let sealed = tmp.path().join("nope.enc");

    let err = encrypt_attachment(&missing, &sealed, None).unwrap_err();
    assert!(matches!(err, CryptoError::Io(_)));
    assert!(!sealed.exists());
}

#[test]
fn test_reencrypt_from_handle_offset() {
    let tmp = TempDir::new().unwrap();
    let data = make_data(10_000);
    let input = write_test_file(tmp.path(), "video.mp4", &data);
    let sealed = tmp.path().join("video.enc");
    let resealed = tmp.path().join("video.tail.enc");
    let output = tmp.path().join("video.tail");

    let metadata = encrypt_attachment(&input, &sealed, None).unwrap();
    let mut handle = open_attachment_handle(&sealed, data.len() as u64, &metadata.key).unwrap();
    handle.seek(2500).unwrap();

    let new_key = CombinedKey::generate();
    let new_metadata = reencrypt(&mut handle, &resealed, Some(new_key), true).unwrap();
    assert_eq!(new_metadata.plaintext_length, Some(7500));

    decrypt_attachment(&resealed, &new_metadata, &output).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), &data[2500..]);
}
