//! Security handler interface
//!
//! Decryption itself lives outside this crate; the parser only knows when
//! to call out. A handler is installed on the reader before parsing, primed
//! with the `/Encrypt` dictionary once the trailer is known, and then asked
//! to decrypt every object and stream as they are parsed (the encryption
//! dictionary itself excepted).

use bitflags::bitflags;

use crate::parser::objects::{PdfDictionary, PdfObject, PdfStream};

bitflags! {
    /// Document access permissions (ISO 32000-1 Table 22).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessPermissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const EXTRACT = 1 << 4;
        const MODIFY_ANNOTATIONS = 1 << 5;
        const FILL_IN_FORM = 1 << 8;
        const EXTRACT_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE_DOCUMENT = 1 << 10;
        const PRINT_FAITHFUL = 1 << 11;
    }
}

/// What the caller supplies to unlock the document.
#[derive(Debug, Clone)]
pub enum DecryptionMaterial {
    /// Standard security handler password (user or owner). The default is
    /// the empty user password.
    Password(String),
}

impl Default for DecryptionMaterial {
    fn default() -> Self {
        DecryptionMaterial::Password(String::new())
    }
}

/// Errors raised by a security handler.
pub type SecurityError = Box<dyn std::error::Error + Send + Sync>;

/// Decryption collaborator. Implementations own all cryptographic state;
/// the parser never looks inside.
pub trait SecurityHandler {
    /// Prime the handler from the `/Encrypt` dictionary and the document
    /// `/ID` before any object is decrypted.
    fn prepare_for_decryption(
        &mut self,
        encryption_dict: &PdfDictionary,
        document_id: Option<&PdfObject>,
        material: &DecryptionMaterial,
    ) -> Result<(), SecurityError>;

    /// Decrypt the strings inside a freshly parsed object, in place.
    fn decrypt(
        &mut self,
        object: &mut PdfObject,
        number: u32,
        generation: u16,
    ) -> Result<(), SecurityError>;

    /// Decrypt a stream payload, in place.
    fn decrypt_stream(
        &mut self,
        stream: &mut PdfStream,
        number: u32,
        generation: u16,
    ) -> Result<(), SecurityError>;

    /// Permissions extracted during preparation.
    fn current_access_permissions(&self) -> AccessPermissions;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bits() {
        let perms = AccessPermissions::PRINT | AccessPermissions::EXTRACT;
        assert!(perms.contains(AccessPermissions::PRINT));
        assert!(!perms.contains(AccessPermissions::MODIFY));
        assert_eq!(AccessPermissions::PRINT.bits(), 4);
        assert_eq!(AccessPermissions::PRINT_FAITHFUL.bits(), 2048);
    }

    #[test]
    fn test_default_material_is_empty_password() {
        match DecryptionMaterial::default() {
            DecryptionMaterial::Password(p) => assert!(p.is_empty()),
        }
    }
}
