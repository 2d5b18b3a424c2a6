//! Vendor-string composition.

/// Display budget for the vendor inside a LAN beacon MOTD.
const MOTD_VENDOR_LIMIT: usize = 30;

/// Builds `"<product> <overlay_version>[ <launcher_custom>]"`: what guests
/// report in `c:player_ping` and what shows up in the rebroadcast MOTD.
pub(crate) fn compose(product: &str, overlay_version: &str, launcher_custom: Option<&str>) -> String {
    match launcher_custom {
        Some(custom) if !custom.is_empty() => format!("{product} {overlay_version} {custom}"),
        _ => format!("{product} {overlay_version}"),
    }
}

/// Caps the vendor at 30 characters for the MOTD, ellipsizing with `...`.
pub(crate) fn truncate_for_motd(vendor: &str) -> String {
    if vendor.chars().count() <= MOTD_VENDOR_LIMIT {
        return vendor.to_owned();
    }

    let head: String = vendor.chars().take(MOTD_VENDOR_LIMIT - 3).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition() {
        assert_eq!(compose("scaffolding", "2.1.0", None), "scaffolding 2.1.0");
        assert_eq!(
            compose("scaffolding", "2.1.0", Some("mylauncher")),
            "scaffolding 2.1.0 mylauncher"
        );
        assert_eq!(compose("scaffolding", "2.1.0", Some("")), "scaffolding 2.1.0");
    }

    #[test]
    fn short_vendor_passes_through() {
        assert_eq!(truncate_for_motd("scaffolding 2.1.0"), "scaffolding 2.1.0");
    }

    #[test]
    fn long_vendor_is_ellipsized_to_thirty() {
        let long = "scaffolding 2.1.0 some very long launcher tag";
        let out = truncate_for_motd(long);
        assert_eq!(out.chars().count(), 30);
        assert!(out.ends_with("..."));
        assert!(long.starts_with(out.trim_end_matches("...")));
    }

    #[test]
    fn exactly_thirty_is_untouched() {
        let vendor = "x".repeat(30);
        assert_eq!(truncate_for_motd(&vendor), vendor);
    }
}
