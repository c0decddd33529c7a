//! Allow-list driven encryption of record fields.

use serde_json::{Map, Value};

use crate::crypto::codec::{CryptoError, FieldCipher};

/// KYC columns the platform stores encrypted.
pub const KYC_FIELDS: &[&str] = &[
    "id_number",
    "tax_id",
    "phone_number",
    "address",
    "date_of_birth",
    "bank_account_number",
    "pep_details",
];

impl FieldCipher {
    /// Encrypt the listed string fields of `record` in place.
    ///
    /// Fields that are missing, null, empty, non-string, or already
    /// encrypted are left untouched. Returns how many fields changed.
    pub fn encrypt_fields(
        &self,
        record: &mut Map<String, Value>,
        fields: &[&str],
    ) -> Result<usize, CryptoError> {
        let mut changed = 0;
        for name in fields {
            let Some(Value::String(current)) = record.get(*name) else {
                continue;
            };
            if Self::is_encrypted(Some(current)) {
                continue;
            }
            if let Some(encrypted) = self.encrypt(Some(current))? {
                record.insert((*name).to_string(), Value::String(encrypted));
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Decrypt the listed fields of `record` in place.
    ///
    /// Returns how many fields were decrypted. Fields that fail to decrypt
    /// keep their stored value and are not counted.
    pub fn decrypt_fields(&self, record: &mut Map<String, Value>, fields: &[&str]) -> usize {
        let mut changed = 0;
        for name in fields {
            let Some(Value::String(current)) = record.get(*name) else {
                continue;
            };
            if !Self::is_encrypted(Some(current)) {
                continue;
            }
            match self.decrypt(Some(current)) {
                Some(plain) if plain != *current => {
                    record.insert((*name).to_string(), Value::String(plain));
                    changed += 1;
                }
                _ => {}
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> FieldCipher {
        FieldCipher::from_hex_key(&"ab".repeat(32)).unwrap()
    }

    fn record() -> Map<String, Value> {
        json!({
            "id": 7,
            "full_name": "Jane Investor",
            "id_number": "3201234567890001",
            "phone_number": "+62811111111",
            "address": "",
            "tax_id": null,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_only_listed_fields_are_encrypted() {
        let c = cipher();
        let mut r = record();
        let changed = c.encrypt_fields(&mut r, KYC_FIELDS).unwrap();

        assert_eq!(changed, 2);
        assert_eq!(r["full_name"], "Jane Investor");
        assert_eq!(r["id"], 7);
        assert_eq!(r["address"], "");
        assert!(r["tax_id"].is_null());
        assert!(FieldCipher::is_encrypted(r["id_number"].as_str()));
        assert!(FieldCipher::is_encrypted(r["phone_number"].as_str()));
    }

    #[test]
    fn test_encrypt_fields_is_idempotent() {
        let c = cipher();
        let mut r = record();
        c.encrypt_fields(&mut r, KYC_FIELDS).unwrap();
        let once = r.clone();

        let changed = c.encrypt_fields(&mut r, KYC_FIELDS).unwrap();
        assert_eq!(changed, 0);
        assert_eq!(r, once);
    }

    #[test]
    fn test_decrypt_fields_restores_record() {
        let c = cipher();
        let original = record();
        let mut r = original.clone();
        c.encrypt_fields(&mut r, KYC_FIELDS).unwrap();

        assert_eq!(c.decrypt_fields(&mut r, KYC_FIELDS), 2);
        assert_eq!(r, original);
    }

    #[test]
    fn test_undecryptable_field_is_not_counted() {
        let mut r = record();
        cipher().encrypt_fields(&mut r, KYC_FIELDS).unwrap();
        let stored = r.clone();

        let other = FieldCipher::from_hex_key(&"cd".repeat(32)).unwrap();
        assert_eq!(other.decrypt_fields(&mut r, KYC_FIELDS), 0);
        assert_eq!(r, stored);
    }
}
