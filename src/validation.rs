//! Input validation for billing operations.
//!
//! Values crossing the API boundary (identifiers, currency codes,
//! metadata bags) are validated here before any request is built, so a
//! malformed input fails fast as a [`BillingError::Validation`] instead
//! of a confusing backend rejection.

use std::collections::HashMap;

use crate::error::{BillingError, Result};

/// Maximum length for payment method identifiers.
const MAX_PAYMENT_METHOD_ID_LENGTH: usize = 256;

/// Maximum length for invoice numbers.
const MAX_INVOICE_NUMBER_LENGTH: usize = 64;

/// Maximum number of entries in a metadata bag.
const MAX_METADATA_ENTRIES: usize = 50;

/// Maximum length of a metadata key or value.
const MAX_METADATA_LENGTH: usize = 512;

/// Validate a payment method identifier.
///
/// Must be non-empty, within length bounds, and contain only
/// alphanumeric characters, underscores, and hyphens.
pub fn validate_payment_method_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(BillingError::validation("payment method id cannot be empty"));
    }
    if id.len() > MAX_PAYMENT_METHOD_ID_LENGTH {
        return Err(BillingError::validation(format!(
            "payment method id exceeds maximum length of {}",
            MAX_PAYMENT_METHOD_ID_LENGTH
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BillingError::validation(
            "payment method id contains invalid characters (only alphanumeric, underscore, and hyphen allowed)",
        ));
    }
    Ok(())
}

/// Validate an ISO 4217 currency code: exactly three ASCII letters.
pub fn validate_currency(code: &str) -> Result<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(BillingError::validation(format!(
            "currency must be a three-letter ISO 4217 code, got '{}'",
            sanitize_for_error(code)
        )));
    }
    Ok(())
}

/// Validate an invoice number.
pub fn validate_invoice_number(number: &str) -> Result<()> {
    if number.is_empty() {
        return Err(BillingError::validation("invoice number cannot be empty"));
    }
    if number.len() > MAX_INVOICE_NUMBER_LENGTH {
        return Err(BillingError::validation(format!(
            "invoice number exceeds maximum length of {}",
            MAX_INVOICE_NUMBER_LENGTH
        )));
    }
    if !number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BillingError::validation(
            "invoice number contains invalid characters",
        ));
    }
    Ok(())
}

/// Validate a metadata bag at the boundary.
///
/// Metadata is an open-ended key-value map, but it is not trusted as
/// opaque passthrough: entry count, key/value lengths and key charset
/// are bounded before it leaves the client.
pub fn validate_metadata(metadata: &HashMap<String, String>) -> Result<()> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(BillingError::validation(format!(
            "metadata exceeds maximum of {} entries",
            MAX_METADATA_ENTRIES
        )));
    }
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(BillingError::validation("metadata keys cannot be empty"));
        }
        if key.len() > MAX_METADATA_LENGTH || value.len() > MAX_METADATA_LENGTH {
            return Err(BillingError::validation(format!(
                "metadata entries are limited to {} characters",
                MAX_METADATA_LENGTH
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(BillingError::validation(format!(
                "metadata key '{}' contains invalid characters",
                sanitize_for_error(key)
            )));
        }
    }
    Ok(())
}

/// Strip non-printable characters and truncate so untrusted input can be
/// echoed into an error message safely.
fn sanitize_for_error(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(32)
        .collect();
    if cleaned.len() < input.len() {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}
