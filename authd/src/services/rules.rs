//! Field validation rules.
//!
//! Each validation form is a table mapping a field to its ordered rules.
//! Evaluation never short-circuits: every rule of every field runs and all
//! violations are collected into [`FieldErrors`].

use crate::services::error::AuthError;
use crate::store::StoreTx;
use serde::Serialize;
use std::collections::BTreeMap;
use validator::ValidateEmail;

pub const EMAIL_INVALID: &str = "email-invalid";
pub const EMAIL_UNIQ: &str = "email-uniq";
pub const PASSWORD_SHORT: &str = "password-short";

/// Violations keyed by field name, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<&'static str>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email_taken() -> Self {
        let mut errors = Self::new();
        errors.add(Field::Email.name(), EMAIL_UNIQ);
        errors
    }

    pub fn add(&mut self, field: &'static str, code: &'static str) {
        self.0.entry(field).or_default().push(code);
    }

    pub fn get(&self, field: &str) -> Option<&[&'static str]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok` when nothing was reported, otherwise an `Argument` error.
    pub fn into_result(self) -> Result<(), AuthError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Argument(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, codes) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, codes.join(", "))?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Email,
    Password,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Password => "password",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    EmailFormat,
    /// No account holds the address, as seen by the active transaction.
    EmailUnique,
    MinLength(usize),
}

/// Values under validation. Fields a form does not list are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Input<'a> {
    pub email: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl<'a> Input<'a> {
    fn value(&self, field: Field) -> &'a str {
        match field {
            Field::Email => self.email.unwrap_or_default(),
            Field::Password => self.password.unwrap_or_default(),
        }
    }
}

type RuleTable = Vec<(Field, Vec<Rule>)>;

#[derive(Debug, Clone)]
pub struct FieldRules {
    account: RuleTable,
    email: RuleTable,
    password: RuleTable,
}

impl FieldRules {
    pub fn new(password_min_length: usize) -> Self {
        let min_length = Rule::MinLength(password_min_length);
        Self {
            account: vec![
                (Field::Email, vec![Rule::EmailFormat, Rule::EmailUnique]),
                (Field::Password, vec![min_length]),
            ],
            email: vec![(Field::Email, vec![Rule::EmailFormat])],
            password: vec![(Field::Password, vec![min_length])],
        }
    }

    pub async fn validate_account_creation(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
        password: &str,
    ) -> Result<FieldErrors, AuthError> {
        let input = Input {
            email: Some(email),
            password: Some(password),
        };
        evaluate(&self.account, &input, Some(tx)).await
    }

    pub async fn validate_email(&self, email: &str) -> Result<FieldErrors, AuthError> {
        let input = Input {
            email: Some(email),
            ..Input::default()
        };
        evaluate(&self.email, &input, None).await
    }

    pub async fn validate_password(&self, password: &str) -> Result<FieldErrors, AuthError> {
        let input = Input {
            password: Some(password),
            ..Input::default()
        };
        evaluate(&self.password, &input, None).await
    }
}

/// Whether an account with this email exists in the transaction's view.
pub async fn email_exists(tx: &mut dyn StoreTx, email: &str) -> Result<bool, AuthError> {
    Ok(tx.find_account_by_email(email).await?.is_some())
}

async fn evaluate(
    table: &[(Field, Vec<Rule>)],
    input: &Input<'_>,
    mut tx: Option<&mut dyn StoreTx>,
) -> Result<FieldErrors, AuthError> {
    let mut errors = FieldErrors::new();

    for (field, rules) in table {
        let value = input.value(*field);
        for rule in rules {
            let violation = match rule {
                Rule::EmailFormat => (!value.to_owned().validate_email()).then_some(EMAIL_INVALID),
                Rule::EmailUnique => {
                    let tx = tx.as_deref_mut().ok_or_else(|| {
                        AuthError::internal("uniqueness rule evaluated without a transaction")
                    })?;
                    email_exists(tx, value).await?.then_some(EMAIL_UNIQ)
                }
                Rule::MinLength(min) => (value.chars().count() < *min).then_some(PASSWORD_SHORT),
            };

            if let Some(code) = violation {
                errors.add(field.name(), code);
            }
        }
    }

    Ok(errors)
}
