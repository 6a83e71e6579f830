//! Chunked mention broadcast with inter-batch pacing.

use std::time::Duration;
use warden_transport::{OutboundPayload, Transport, TransportError};

/// Send `banner` plus per-member mention markup in batches. Each outbound
/// message's mentions list names exactly the members of its batch. The
/// pause between batches is a deliberate throttle for transport rate
/// limits; tests pass `Duration::ZERO`.
pub async fn broadcast_mentions(
    transport: &dyn Transport,
    chat_id: &str,
    banner: &str,
    members: &[String],
    batch_size: usize,
    pause: Duration,
) -> Result<usize, TransportError> {
    let batch_size = batch_size.max(1);
    let batches = members.chunks(batch_size).count();

    for (index, chunk) in members.chunks(batch_size).enumerate() {
        let names = chunk
            .iter()
            .map(|jid| format!("@{}", jid.split('@').next().unwrap_or(jid)))
            .collect::<Vec<_>>()
            .join(" ");
        let text = format!("{}\n{}", banner, names);

        transport
            .send_message(
                chat_id,
                OutboundPayload::text_with_mentions(text, chunk.to_vec()),
            )
            .await?;

        if index + 1 < batches {
            tokio::time::sleep(pause).await;
        }
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    fn members(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}@s.whatsapp.net", 1000 + i)).collect()
    }

    #[tokio::test]
    async fn forty_five_members_yield_three_exact_batches() {
        let transport = MockTransport::shared();
        let all = members(45);

        let batches = broadcast_mentions(
            transport.as_ref(),
            "g1@g.us",
            "banner",
            &all,
            20,
            Duration::ZERO,
        )
        .await
        .expect("broadcast");
        assert_eq!(batches, 3);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);

        let mention_lists: Vec<Vec<String>> = sent
            .iter()
            .map(|(chat, payload)| {
                assert_eq!(chat, "g1@g.us");
                match payload {
                    OutboundPayload::Text { mentions, text } => {
                        // Every mentioned member appears in this batch's markup.
                        for jid in mentions {
                            let local = jid.split('@').next().unwrap();
                            assert!(text.contains(&format!("@{}", local)));
                        }
                        mentions.clone()
                    }
                    _ => panic!("expected text payload"),
                }
            })
            .collect();

        assert_eq!(mention_lists[0], all[0..20].to_vec());
        assert_eq!(mention_lists[1], all[20..40].to_vec());
        assert_eq!(mention_lists[2], all[40..45].to_vec());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_runt_batch() {
        let transport = MockTransport::shared();
        let all = members(40);

        let batches = broadcast_mentions(
            transport.as_ref(),
            "g1@g.us",
            "banner",
            &all,
            20,
            Duration::ZERO,
        )
        .await
        .expect("broadcast");

        assert_eq!(batches, 2);
        assert_eq!(transport.sent().len(), 2);
    }
}
