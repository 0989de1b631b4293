//! Received-file naming convention.

use crate::ValidPacket;
use std::borrow::Cow;

/// Name a received packet file:
/// `<type>.<originating_site>.<transaction_id>.<local_site>.<remote_site>.<packet_id>.<unix_timestamp>.xml`.
///
/// Path separators inside header values are replaced with `_` so a packet
/// can never name a file outside the target directory.
pub fn received_file_name(packet: &ValidPacket, unix_timestamp: i64) -> String {
    format!(
        "{}.{}.{}.{}.{}.{}.{}.xml",
        component(&packet.packet_type),
        component(&packet.originating_site_name),
        component(&packet.transaction_id),
        component(&packet.local_site),
        component(&packet.remote_site),
        component(&packet.packet_id),
        unix_timestamp,
    )
}

fn component(value: &str) -> Cow<'_, str> {
    if value.contains(['/', '\\', '\0']) {
        Cow::Owned(value.replace(['/', '\\', '\0'], "_"))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> ValidPacket {
        ValidPacket {
            packet_type: "request_compute_account".to_string(),
            version: "1.0".to_string(),
            originating_site_name: "A".to_string(),
            transaction_id: "T1".to_string(),
            packet_id: "P1".to_string(),
            local_site: "X".to_string(),
            remote_site: "Y".to_string(),
        }
    }

    #[test]
    fn encodes_identifying_fields_in_order() {
        assert_eq!(
            received_file_name(&packet(), 1_700_000_000),
            "request_compute_account.A.T1.X.Y.P1.1700000000.xml"
        );
    }

    #[test]
    fn path_separators_are_neutralized() {
        let mut packet = packet();
        packet.originating_site_name = "../../etc".to_string();
        packet.packet_id = "a\\b".to_string();
        let name = received_file_name(&packet, 7);
        assert_eq!(name, "request_compute_account..._.._etc.T1.X.Y.a_b.7.xml");
        assert!(!name.contains('/'));
    }
}
