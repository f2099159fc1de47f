//! Small helpers shared across the capture modules.

/// Locate the `name=` of the appsink element inside a launch description.
///
/// Capture requires a *named* appsink so the constructed pipeline can be
/// queried for the delivery endpoint; an unnamed appsink (or none at all)
/// returns `None` and setup fails.
pub fn appsink_name(launch: &str) -> Option<String> {
    for stage in launch.split('!') {
        let mut tokens = stage.split_whitespace();
        if tokens.next() != Some("appsink") {
            continue;
        }
        return tokens
            .find_map(|token| token.strip_prefix("name="))
            .map(str::to_owned);
    }
    None
}
