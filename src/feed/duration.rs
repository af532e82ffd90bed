/// Parse an `<itunes:duration>` value into whole seconds.
///
/// Accepts plain integer seconds, `mm:ss`, and `hh:mm:ss`. Anything else
/// (including the empty string) yields None; feeds carry free-form values
/// here and an unparseable duration is not an error.
pub fn parse_itunes_duration(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u32>() {
        return Some(secs);
    }

    if value.contains(':') {
        return parse_colon_format(value);
    }

    None
}

fn parse_colon_format(value: &str) -> Option<u32> {
    let parts: Vec<&str> = value.split(':').collect();

    match parts.len() {
        2 => {
            let mins: u32 = parts[0].trim().parse().ok()?;
            let secs: u32 = parts[1].trim().parse().ok()?;
            mins.checked_mul(60)?.checked_add(secs)
        }
        3 => {
            let hours: u32 = parts[0].trim().parse().ok()?;
            let mins: u32 = parts[1].trim().parse().ok()?;
            let secs: u32 = parts[2].trim().parse().ok()?;
            hours
                .checked_mul(3600)?
                .checked_add(mins.checked_mul(60)?)?
                .checked_add(secs)
        }
        _ => None,
    }
}
