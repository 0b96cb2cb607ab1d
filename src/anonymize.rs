//! Identity masking for display surfaces.
//!
//! Leaderboards show who finished what; raw email addresses do not belong
//! there. Masking is display-only: stored documents keep the real identity
//! in `updated_by`.

/// Mask an email-shaped identity for display.
///
/// `jdoe@example.com` becomes `j***@e******.com`: the local part and the
/// domain name keep their first character, the rest turns into one `*` per
/// character, and the extension after the last dot stays readable. Inputs
/// that are not shaped like `local@domain.ext` (no `@`, more than one `@`,
/// or a dotless domain) come back unchanged, so callers can apply this
/// unconditionally.
pub fn mask_identity(identity: &str) -> String {
    let mut parts = identity.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return identity.to_string();
    };
    let Some((name, extension)) = domain.rsplit_once('.') else {
        return identity.to_string();
    };
    format!("{}@{}.{extension}", mask_part(local), mask_part(name))
}

/// First character kept, every following character replaced by `*`. Counts
/// characters, not bytes.
fn mask_part(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => {
            let stars = "*".repeat(chars.count());
            format!("{first}{stars}")
        }
        None => String::new(),
    }
}
