//! Display masking for values that must appear in logs or reports.

/// Mask the local part of an email address, keeping the domain.
///
/// `user@example.com` becomes `u**r@example.com`. Local parts of one or two
/// characters keep only the first. Values without an `@`, or with an empty
/// local part, are returned unchanged.
pub fn anonymize_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_owned();
    };
    let chars: Vec<char> = local.chars().collect();
    let masked: String = match chars.as_slice() {
        [] => return email.to_owned(),
        [first] => first.to_string(),
        [first, _] => format!("{first}*"),
        [first, middle @ .., last] => {
            format!("{first}{}{last}", "*".repeat(middle.len()))
        }
    };
    format!("{masked}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_and_last_of_long_local_part() {
        assert_eq!(anonymize_email("user@example.com"), "u**r@example.com");
        assert_eq!(anonymize_email("jo.smith@mail.org"), "j******h@mail.org");
    }

    #[test]
    fn short_local_part_keeps_first_only() {
        assert_eq!(anonymize_email("ab@x.io"), "a*@x.io");
        assert_eq!(anonymize_email("a@x.io"), "a@x.io");
    }

    #[test]
    fn only_first_at_splits() {
        assert_eq!(anonymize_email("abc@d@e"), "a*c@d@e");
    }

    #[test]
    fn non_addresses_pass_through() {
        assert_eq!(anonymize_email(""), "");
        assert_eq!(anonymize_email("noatsign"), "noatsign");
        assert_eq!(anonymize_email("@example.com"), "@example.com");
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(anonymize_email("żółw@przykład.pl"), "ż**w@przykład.pl");
    }
}
