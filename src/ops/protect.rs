//! Protect and unlock: add or remove password encryption.
//!
//! Protection uses the standard security handler (RC4, 128-bit key) with
//! the same password as owner and user password. Only printing is allowed.

use super::{load, save};
use crate::error::TransformError;
use crate::operation::{ProtectParams, UnlockParams};
use lopdf::encryption::DecryptionError;
use lopdf::{Document, EncryptionState, EncryptionVersion, Object, Permissions, StringFormat};
use tracing::{info, instrument, warn};

/// Apply password protection.
#[instrument(skip_all)]
pub fn protect(input: &[u8], params: &ProtectParams) -> Result<Vec<u8>, TransformError> {
    const ACTION: &str = "protect PDF";
    if params.password.is_empty() {
        return Err(TransformError::validation("Password is required"));
    }

    let mut doc = load(input, ACTION)?;
    if doc.is_encrypted() || doc.encryption_state.is_some() {
        return Err(TransformError::validation("PDF is already password protected"));
    }
    ensure_file_id(&mut doc);

    let version = EncryptionVersion::V2 {
        document: &doc,
        owner_password: &params.password,
        user_password: &params.password,
        key_length: 128,
        permissions: Permissions::PRINTABLE | Permissions::PRINTABLE_IN_HIGH_QUALITY,
    };
    let state = EncryptionState::try_from(version)
        .map_err(|e| TransformError::processing(ACTION, e))?;
    doc.encrypt(&state)
        .map_err(|e| TransformError::processing(ACTION, e))?;

    let out = save(&mut doc, ACTION)?;
    info!(bytes = out.len(), "Protected PDF");
    Ok(out)
}

/// Remove password protection using the supplied password.
///
/// Fails with a validation error when the input is not encrypted or the
/// password is wrong, and with a capability error when the document uses a
/// security handler the codec cannot decrypt.
#[instrument(skip_all)]
pub fn unlock(input: &[u8], params: &UnlockParams) -> Result<Vec<u8>, TransformError> {
    // The loader keeps only the encryption dictionary unless the empty user
    // password opens the file.
    let opened = load(input, UNLOCK)?;
    if !opened.is_encrypted() {
        return Err(TransformError::validation("PDF is not password protected"));
    }
    opened
        .authenticate_password(&params.password)
        .map_err(decrypt_error)?;

    let mut doc = if opened.encryption_state.is_some() {
        opened
    } else {
        let mut sealed = load_sealed(input)?;
        sealed.decrypt(&params.password).map_err(decrypt_error)?;
        sealed
    };

    if let Ok(id) = doc.trailer.get(b"Encrypt").and_then(Object::as_reference) {
        doc.objects.remove(&id);
    }
    doc.trailer.remove(b"Encrypt");
    doc.encryption_state = None;
    if doc.get_pages().is_empty() {
        warn!("Decrypted document has no readable pages");
        return Err(TransformError::capability("unlock", UNSUPPORTED));
    }

    let out = save(&mut doc, UNLOCK)?;
    info!(bytes = out.len(), "Unlocked PDF");
    Ok(out)
}

const UNLOCK: &str = "unlock PDF";
const UNSUPPORTED: &str = "unlock not supported by current codec";

/// Same-length stand-in for the trailer's `/Encrypt` key.
const SEALED_KEY: &[u8] = b"/Encrypz";

fn decrypt_error(err: lopdf::Error) -> TransformError {
    match err {
        lopdf::Error::Decryption(DecryptionError::IncorrectPassword) => {
            TransformError::validation("Incorrect password")
        }
        lopdf::Error::Decryption(
            e @ (DecryptionError::UnsupportedEncryption
            | DecryptionError::UnsupportedVersion
            | DecryptionError::UnsupportedRevision),
        ) => {
            warn!(error = %e, "Unsupported security handler");
            TransformError::capability("unlock", UNSUPPORTED)
        }
        other => TransformError::processing(UNLOCK, other),
    }
}

/// Parse every object of an encrypted file without decrypting it, so that
/// `Document::decrypt` can run with a caller-supplied password.
///
/// The trailer's `/Encrypt` reference is renamed in place before parsing and
/// restored afterwards; byte offsets are unchanged.
fn load_sealed(input: &[u8]) -> Result<Document, TransformError> {
    let mut masked = input.to_vec();
    let renamed = mask_encrypt_refs(&mut masked);
    if renamed == 0 {
        return Err(TransformError::capability("unlock", UNSUPPORTED));
    }

    let mut doc = load(&masked, UNLOCK)?;
    let encrypt = doc
        .trailer
        .remove(&SEALED_KEY[1..])
        .ok_or_else(|| TransformError::capability("unlock", UNSUPPORTED))?;
    doc.trailer.set("Encrypt", encrypt);
    Ok(doc)
}

/// Rename every `/Encrypt <num> <gen> R` entry to [`SEALED_KEY`].
fn mask_encrypt_refs(bytes: &mut [u8]) -> usize {
    const KEY: &[u8] = b"/Encrypt";
    let mut renamed = 0;
    let mut i = 0;
    while i + KEY.len() <= bytes.len() {
        if &bytes[i..i + KEY.len()] == KEY && is_reference(&bytes[i + KEY.len()..]) {
            bytes[i..i + KEY.len()].copy_from_slice(SEALED_KEY);
            renamed += 1;
            i += KEY.len();
        } else {
            i += 1;
        }
    }
    renamed
}

/// Whether `rest` starts with an indirect reference such as ` 12 0 R`.
fn is_reference(rest: &[u8]) -> bool {
    let mut pos = 0;
    for _ in 0..2 {
        let blank = rest[pos..].iter().take_while(|b| b.is_ascii_whitespace()).count();
        if blank == 0 {
            return false;
        }
        pos += blank;
        let digits = rest[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        pos += digits;
    }
    let blank = rest[pos..].iter().take_while(|b| b.is_ascii_whitespace()).count();
    blank > 0 && rest.get(pos + blank) == Some(&b'R')
}

/// The standard security handler keys off the first `/ID` string.
fn ensure_file_id(doc: &mut Document) {
    if doc.trailer.has(b"ID") {
        return;
    }
    let id = uuid::Uuid::new_v4().as_bytes().to_vec();
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id, StringFormat::Hexadecimal),
        ]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil::{page_texts, pdf_with_pages};

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn protect_with(input: &[u8], password: &str) -> Vec<u8> {
        protect(
            input,
            &ProtectParams {
                password: password.to_string(),
            },
        )
        .unwrap()
    }

    fn unlock_with(input: &[u8], password: &str) -> Result<Vec<u8>, TransformError> {
        unlock(
            input,
            &UnlockParams {
                password: password.to_string(),
            },
        )
    }

    #[test]
    fn protected_output_hides_plaintext() {
        let input = pdf_with_pages(1, "Secret");
        assert!(contains(&input, b"Secret-Page-1"));

        let out = protect_with(&input, "hunter2");
        assert!(contains(&out, b"/Encrypt"));
        assert!(!contains(&out, b"Secret-Page-1"));
    }

    #[test]
    fn empty_password_is_rejected() {
        let err = protect(
            &pdf_with_pages(1, "A"),
            &ProtectParams {
                password: String::new(),
            },
        )
        .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn unlock_round_trip_restores_content() {
        let locked = protect_with(&pdf_with_pages(2, "A"), "hunter2");
        let unlocked = unlock_with(&locked, "hunter2").unwrap();
        assert!(!contains(&unlocked, b"/Encrypt"));
        let texts = page_texts(&unlocked);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("A-Page-1"));
    }

    #[test]
    fn unlock_plain_pdf_is_validation_error() {
        let err = unlock_with(&pdf_with_pages(1, "A"), "").unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.to_string(), "PDF is not password protected");
    }

    #[test]
    fn unlock_wrong_password_is_validation_error() {
        let locked = protect_with(&pdf_with_pages(1, "A"), "hunter2");
        let err = unlock_with(&locked, "wrong").unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.to_string(), "Incorrect password");
    }

    #[test]
    fn unlock_with_right_password_keeps_every_page() {
        let locked = protect_with(&pdf_with_pages(3, "Vault"), "s3cret");
        let texts = page_texts(&unlock_with(&locked, "s3cret").unwrap());
        assert_eq!(texts.len(), 3);
        for (i, text) in texts.iter().enumerate() {
            assert!(text.contains(&format!("Vault-Page-{}", i + 1)));
        }
    }

    #[test]
    fn literal_encrypt_text_does_not_count_as_protection() {
        let plain = pdf_with_pages(1, "/Encrypt 3 0 R");
        assert!(contains(&plain, b"/Encrypt 3 0 R"));

        let err = unlock_with(&plain, "").unwrap_err();
        assert_eq!(err.to_string(), "PDF is not password protected");
        assert!(protect_with(&plain, "pw").len() > plain.len());
    }

    #[test]
    fn encrypt_references_are_masked_in_place() {
        let mut trailer = b"<< /Root 1 0 R /Encrypt 9 0 R /EncryptMetadata true >>".to_vec();
        let len = trailer.len();
        assert_eq!(mask_encrypt_refs(&mut trailer), 1);
        assert_eq!(trailer.len(), len);
        assert!(contains(&trailer, b"/Encrypz 9 0 R"));
        assert!(contains(&trailer, b"/EncryptMetadata true"));
    }
}
