//! Flow classification
//!
//! Turns each inbound frame into at most one bucket increment. Frames are
//! never altered or rejected here; whatever the classifier decides, the
//! frame still goes back out.

use crate::buffer::Packet;
use crate::flow::FlowCountTable;
use crate::parse::{HeaderView, ParseError};

/// Outcome of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// IPv4 frame, counted in `bucket`
    Counted {
        /// Bucket that was incremented
        bucket: usize,
    },
    /// Not IPv4; forwarded uncounted
    NotIpv4 {
        /// Ethertype seen
        ethertype: u16,
    },
    /// Too short to read the headers it announces; forwarded uncounted
    Truncated {
        /// Frame length
        len: usize,
    },
}

impl Classification {
    /// Whether a bucket was incremented
    pub fn is_counted(&self) -> bool {
        matches!(self, Classification::Counted { .. })
    }
}

/// Classify a frame and count it if it carries IPv4
#[inline]
pub fn classify_and_count(packet: &Packet, table: &mut FlowCountTable) -> Classification {
    match HeaderView::parse(packet.data()) {
        Ok(HeaderView { ipv4: Some(ip), .. }) => Classification::Counted {
            bucket: table.record(ip.src_addr, ip.dst_addr),
        },
        Ok(HeaderView { ethertype, ipv4: None }) => Classification::NotIpv4 { ethertype },
        Err(ParseError::Truncated { len, .. }) => Classification::Truncated { len },
    }
}

/// Classify every frame of a burst, returning how many were counted
pub fn classify_burst(packets: &[Packet], table: &mut FlowCountTable) -> usize {
    packets
        .iter()
        .filter(|pkt| classify_and_count(pkt, table).is_counted())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ipv4_frame(src: u32, dst: u32) -> Packet {
        let mut data = vec![0u8; 34];
        data[12] = 0x08; data[13] = 0x00;
        data[14] = 0x45;
        data[23] = 17;
        data[26..30].copy_from_slice(&src.to_ne_bytes());
        data[30..34].copy_from_slice(&dst.to_ne_bytes());
        Packet::new(data)
    }

    fn frame_with_ethertype(ethertype: u16, len: usize) -> Packet {
        let mut data = vec![0u8; len.max(14)];
        data[12..14].copy_from_slice(&ethertype.to_be_bytes());
        Packet::new(data)
    }

    #[test]
    fn test_counts_ipv4() {
        let mut table = FlowCountTable::new();
        let result = classify_and_count(&ipv4_frame(2, 3), &mut table);

        assert_eq!(result, Classification::Counted { bucket: 5 });
        assert_eq!(table.count(5), 1);
    }

    #[test]
    fn test_ignores_arp() {
        let mut table = FlowCountTable::new();
        let result = classify_and_count(&frame_with_ethertype(0x0806, 60), &mut table);

        assert_eq!(result, Classification::NotIpv4 { ethertype: 0x0806 });
        assert_eq!(table.count_active_flows(), 0);
    }

    #[test]
    fn test_truncated_not_counted() {
        let mut table = FlowCountTable::new();
        let short = Packet::new(vec![0u8; 8]);

        assert_eq!(
            classify_and_count(&short, &mut table),
            Classification::Truncated { len: 8 }
        );
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn test_empty_burst() {
        let mut table = FlowCountTable::new();
        assert_eq!(classify_burst(&[], &mut table), 0);
        assert_eq!(table.count_active_flows(), 0);
    }

    #[test]
    fn test_burst_5_5_7() {
        let mut table = FlowCountTable::new();
        let burst = vec![ipv4_frame(2, 3), ipv4_frame(1000, 1005), ipv4_frame(3, 4)];

        assert_eq!(classify_burst(&burst, &mut table), 3);
        assert_eq!(table.count(5), 2);
        assert_eq!(table.count(7), 1);
        assert_eq!(table.count_active_flows(), 2);
    }

    proptest! {
        #[test]
        fn non_ipv4_never_counted(ethertype in any::<u16>(), len in 14usize..128) {
            prop_assume!(ethertype != 0x0800);
            let mut table = FlowCountTable::new();
            table.record(1, 1);

            classify_and_count(&frame_with_ethertype(ethertype, len), &mut table);
            prop_assert_eq!(table.count_active_flows(), 1);
            prop_assert_eq!(table.total(), 1);
        }

        #[test]
        fn ipv4_lands_in_sum_bucket(src in any::<u32>(), dst in any::<u32>()) {
            let mut table = FlowCountTable::new();
            let expected = (src.wrapping_add(dst) % 1000) as usize;

            prop_assert_eq!(
                classify_and_count(&ipv4_frame(src, dst), &mut table),
                Classification::Counted { bucket: expected }
            );
            prop_assert_eq!(table.count(expected), 1);
            prop_assert_eq!(table.total(), 1);
        }
    }
}
