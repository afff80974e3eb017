//! Client-property rotation: a deterministic, unique `{os, browser, device}`
//! triple assigned to each new session so that IDENTIFY fingerprinting
//! throttles per claimed device rather than per process.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

const OS_LIST: [&str; 5] = ["linux", "windows", "macos", "android", "ios"];
const BROWSER_LIST: [&str; 7] = [
    "chrome", "firefox", "safari", "edge", "opera", "samsung", "discord",
];

static NEXT_INDEX: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
/// Required properties for the `Identify` opcode.
///
/// [Discord documentation](https://discord.com/developers/docs/events/gateway#identifying)
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

/// Claims the next process-wide session index. Never reset; safe to reuse
/// across process restarts because the gateway only throttles per device
/// fingerprint within a short window.
pub fn next_index() -> u64 {
    NEXT_INDEX.fetch_add(1, Ordering::Relaxed)
}

/// Computes the `(os, browser, device)` triple for a given session index.
///
/// For the first `OS_LIST.len() * BROWSER_LIST.len()` indices the `(os,
/// browser)` pair alone is unique and `device` is left empty. Beyond that,
/// `device` is set to `"device-{index}"` to guarantee uniqueness of the full
/// triple.
#[must_use]
pub fn properties_for_index(index: u64) -> ClientProperties {
    let os_count = OS_LIST.len() as u64;
    let browser_count = BROWSER_LIST.len() as u64;
    let base_combinations = os_count * browser_count;

    let os = OS_LIST[(index % os_count) as usize];
    let browser = BROWSER_LIST[((index / os_count) % browser_count) as usize];
    let device = if index < base_combinations {
        String::new()
    } else {
        format!("device-{index}")
    };

    ClientProperties {
        os: os.to_string(),
        browser: browser.to_string(),
        device,
    }
}

/// Claims the next session index and returns its client properties.
#[must_use]
pub fn next_properties() -> ClientProperties {
    properties_for_index(next_index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn base_combinations_have_unique_os_browser_pairs() {
        let base = OS_LIST.len() as u64 * BROWSER_LIST.len() as u64;
        let mut seen = HashSet::new();
        for i in 0..base {
            let props = properties_for_index(i);
            assert!(props.device.is_empty());
            assert!(seen.insert((props.os, props.browser)));
        }
    }

    #[test]
    fn indices_beyond_base_get_a_unique_device_suffix() {
        let base = OS_LIST.len() as u64 * BROWSER_LIST.len() as u64;
        let mut seen = HashSet::new();
        for i in base..base + 50 {
            let props = properties_for_index(i);
            assert!(!props.device.is_empty());
            assert!(seen.insert((props.os, props.browser, props.device)));
        }
    }

    #[test]
    fn next_index_is_monotonic_and_unique() {
        let a = next_index();
        let b = next_index();
        assert_ne!(a, b);
    }
}
