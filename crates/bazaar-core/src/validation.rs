//! # Validation Module
//!
//! Input validation for values crossing into the settlement engine.
//!
//! Validation here is the first of two layers: the database schema repeats
//! the hard constraints (CHECK clauses on quantities, percentages, and
//! balances), so a bug in one layer cannot corrupt stored state.

use crate::error::{ValidationError, ValidationResult};
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a cart line quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed [`MAX_LINE_QUANTITY`]
///
/// ## Example
/// ```rust
/// use bazaar_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-1).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an offer price in cents.
///
/// Zero is allowed (free items settle as zero-cent lines); negative is not.
pub fn validate_price_cents(price_cents: i64) -> ValidationResult<()> {
    if price_cents < 0 {
        return Err(ValidationError::MustBePositive {
            field: "price_cents".to_string(),
        });
    }

    Ok(())
}

/// Validates a coupon discount percentage (1-100).
pub fn validate_discount_percent(percent: u8) -> ValidationResult<()> {
    if percent < 1 || percent > 100 {
        return Err(ValidationError::OutOfRange {
            field: "discount_percent".to_string(),
            min: 1,
            max: 100,
        });
    }

    Ok(())
}

/// Validates a cart size before snapshotting it for checkout.
pub fn validate_cart_size(line_count: usize) -> ValidationResult<()> {
    if line_count > MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "cart_lines".to_string(),
            min: 0,
            max: MAX_CART_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a coupon code.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 32 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use bazaar_core::validation::validate_coupon_code;
///
/// assert!(validate_coupon_code("SAVE-10").is_ok());
/// assert!(validate_coupon_code("").is_err());
/// assert!(validate_coupon_code("no spaces!").is_err());
/// ```
pub fn validate_coupon_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "coupon_code".to_string(),
        });
    }

    if code.len() > 32 {
        return Err(ValidationError::TooLong {
            field: "coupon_code".to_string(),
            max: 32,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "coupon_code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
