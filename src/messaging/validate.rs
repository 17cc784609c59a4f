// ABOUTME: Self-validation contract for published payloads
// ABOUTME: Payloads collect failed rules into ValidationErrors before anything reaches the broker
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use serde_json::Value;

use crate::errors::ValidationErrors;

/// Payload-level validation run before publishing.
///
/// ```
/// use txlog::errors::ValidationErrors;
/// use txlog::messaging::Validate;
///
/// struct Order {
///     id: String,
///     quantity: i64,
/// }
///
/// impl Validate for Order {
///     fn validate(&self) -> Result<(), ValidationErrors> {
///         let mut errors = ValidationErrors::new();
///         if self.id.is_empty() {
///             errors.add("id", "is required");
///         }
///         if self.quantity <= 0 {
///             errors.add("quantity", "must be positive");
///         }
///         errors.into_result()
///     }
/// }
///
/// let order = Order { id: String::new(), quantity: 0 };
/// assert_eq!(order.validate().unwrap_err().errors.len(), 2);
/// ```
pub trait Validate {
    /// Check the payload's own rules
    ///
    /// # Errors
    ///
    /// Returns every failed rule
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Untyped JSON carries no rules
impl Validate for Value {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

impl<T: Validate + ?Sized> Validate for &T {
    fn validate(&self) -> Result<(), ValidationErrors> {
        (**self).validate()
    }
}

impl<T: Validate> Validate for [T] {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut all = ValidationErrors::new();
        for (index, item) in self.iter().enumerate() {
            if let Err(errors) = item.validate() {
                for error in errors.errors {
                    all.add(format!("[{index}].{}", error.field), error.message);
                }
            }
        }
        all.into_result()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.as_slice().validate()
    }
}
