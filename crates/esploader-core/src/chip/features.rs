//! Chip radio/feature flags

use bitflags::bitflags;

bitflags! {
    /// Feature flags advertised for a chip family
    ///
    /// These describe the fixed radio and peripheral capabilities of a
    /// family, for user-facing display.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChipFeatures: u32 {
        /// Wi-Fi 6 (802.11ax) radio
        const WIFI6      = 1 << 0;
        /// Bluetooth 5 (LE) radio
        const BT5        = 1 << 1;
        /// Bluetooth Low Energy radio
        const BLE        = 1 << 2;
        /// IEEE 802.15.4 (Thread/Zigbee) radio
        const IEEE802154 = 1 << 3;
    }
}

/// Display labels, in the order feature lists are shown to users
const LABELS: &[(ChipFeatures, &str)] = &[
    (ChipFeatures::WIFI6, "WiFi 6"),
    (ChipFeatures::BT5, "BT 5"),
    (ChipFeatures::BLE, "BLE"),
    (ChipFeatures::IEEE802154, "IEEE802.15.4"),
];

impl ChipFeatures {
    /// The user-facing feature tags, in display order
    ///
    /// The order is fixed by the label table, not by the caller, so the
    /// same chip always lists its features the same way.
    pub fn tags(&self) -> Vec<&'static str> {
        LABELS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, label)| *label)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_display_order() {
        let f = ChipFeatures::IEEE802154 | ChipFeatures::BLE;
        assert_eq!(f.tags(), vec!["BLE", "IEEE802.15.4"]);

        let f = ChipFeatures::WIFI6 | ChipFeatures::BT5 | ChipFeatures::IEEE802154;
        assert_eq!(f.tags(), vec!["WiFi 6", "BT 5", "IEEE802.15.4"]);
    }

    #[test]
    fn empty_features_have_no_tags() {
        assert!(ChipFeatures::empty().tags().is_empty());
    }
}
