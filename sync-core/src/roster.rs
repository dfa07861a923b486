//! Roster encoding.
//!
//! The relay sends the connected usernames as one comma-joined string. Clients
//! show their own entry as [`SELF_MARKER`], always first.

/// Label shown in place of our own username.
pub const SELF_MARKER: &str = "Me";

/// Join usernames for the wire, sorted so every client sees the same order.
pub fn join_roster<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
    names.sort();
    names.join(",")
}

/// Parse a roster string into display order: [`SELF_MARKER`] then every other
/// participant as sent by the relay.
pub fn parse_roster(raw: &str, own_name: &str) -> Vec<String> {
    let mut users = vec![SELF_MARKER.to_owned()];
    users.extend(
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != own_name)
            .map(str::to_owned),
    );
    users
}
