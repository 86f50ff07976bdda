use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrawlError {
    #[error("Invalid search pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{}", describe_out_of_range(.skipped, .malformed, .max))]
    OutOfRangeLine {
        skipped: usize,
        malformed: usize,
        max: usize,
    },

    #[error("Input stream error: {0}")]
    StreamIo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrawlError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

fn describe_out_of_range(skipped: &usize, malformed: &usize, max: &usize) -> String {
    let (skipped, malformed, max) = (*skipped, *malformed, *max);
    let mut msg = String::from("Found ");
    if skipped > 0 {
        msg.push_str(&format!(
            "{skipped} lines with a value outside of the allowed range 1 .. {max}"
        ));
    }
    if malformed > 0 {
        if skipped > 0 {
            msg.push_str(" and ");
        }
        msg.push_str(&format!("{malformed} non-empty lines without a numeric value"));
    }
    msg
}

pub type Result<T> = std::result::Result<T, TrawlError>;

#[cfg(test)]
mod tests {
    use super::TrawlError;

    #[test]
    fn out_of_range_message_names_both_counts() {
        let err = TrawlError::OutOfRangeLine {
            skipped: 2,
            malformed: 1,
            max: 40,
        };
        assert_eq!(
            err.to_string(),
            "Found 2 lines with a value outside of the allowed range 1 .. 40 and 1 non-empty lines without a numeric value"
        );
    }

    #[test]
    fn out_of_range_message_with_only_malformed_lines() {
        let err = TrawlError::OutOfRangeLine {
            skipped: 0,
            malformed: 3,
            max: 10,
        };
        assert_eq!(err.to_string(), "Found 3 non-empty lines without a numeric value");
    }
}
