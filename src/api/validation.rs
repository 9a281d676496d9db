use thiserror::Error;

use super::models::AccountRequest;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;
const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq)]
pub enum RequestValidationError {
    #[error("email must look like name@domain")]
    InvalidEmail,
    #[error("email exceeds {MAX_EMAIL_LEN} characters")]
    EmailTooLong,
    #[error("{0} exceeds {MAX_NAME_LEN} characters")]
    NameTooLong(&'static str),
    #[error("filename is required")]
    MissingFilename,
    #[error("filename exceeds {MAX_FILENAME_LEN} characters")]
    FilenameTooLong,
    #[error("filename must not contain path separators")]
    FilenameHasPath,
}

pub fn validate_account(request: &AccountRequest) -> Result<(), RequestValidationError> {
    if let Some(email) = &request.email {
        let email = email.trim();
        if email.len() > MAX_EMAIL_LEN {
            return Err(RequestValidationError::EmailTooLong);
        }

        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.contains(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(RequestValidationError::InvalidEmail);
        }
    }

    for (field, value) in [
        ("firstName", &request.first_name),
        ("lastName", &request.last_name),
    ] {
        if value.as_deref().is_some_and(|v| v.chars().count() > MAX_NAME_LEN) {
            return Err(RequestValidationError::NameTooLong(field));
        }
    }

    Ok(())
}

pub fn validate_filename(filename: &str) -> Result<(), RequestValidationError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(RequestValidationError::MissingFilename);
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(RequestValidationError::FilenameTooLong);
    }
    if filename.contains(['/', '\\']) {
        return Err(RequestValidationError::FilenameHasPath);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str) -> AccountRequest {
        AccountRequest {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_account_accepts_plain_profile() {
        assert!(validate_account(&request("ana@example.com")).is_ok());
        assert!(validate_account(&AccountRequest::default()).is_ok());
    }

    #[test]
    fn test_validate_account_rejects_bad_email() {
        for email in ["ana", "@example.com", "ana@example", "ana@.com", "a na@example.com"] {
            assert_eq!(
                validate_account(&request(email)),
                Err(RequestValidationError::InvalidEmail),
                "{email}"
            );
        }
    }

    #[test]
    fn test_validate_account_limits_names() {
        let request = AccountRequest {
            first_name: Some("x".repeat(101)),
            ..Default::default()
        };
        assert_eq!(
            validate_account(&request),
            Err(RequestValidationError::NameTooLong("firstName"))
        );
    }

    #[test]
    fn test_validate_filename_rules() {
        assert!(validate_filename("talk.mp4").is_ok());
        assert_eq!(validate_filename("  "), Err(RequestValidationError::MissingFilename));
        assert_eq!(
            validate_filename("../etc/passwd"),
            Err(RequestValidationError::FilenameHasPath)
        );
        assert_eq!(
            validate_filename(&"a".repeat(256)),
            Err(RequestValidationError::FilenameTooLong)
        );
    }
}
