use super::{MailboxApi, MessageRef, MessageSummary};
use futures::stream::{self, StreamExt};
use tracing::warn;

/// Fetches header metadata for `refs` with at most `concurrency` calls in
/// flight.
///
/// Results keep the order of `refs`. A message whose fetch fails is logged
/// and left out; the listing itself still succeeds.
pub async fn fetch_summaries(
    mailbox: &dyn MailboxApi,
    refs: &[MessageRef],
    concurrency: usize,
) -> Vec<MessageSummary> {
    let ids: Vec<String> = refs.iter().map(|message| message.id.clone()).collect();
    let mut fetched: Vec<(usize, MessageSummary)> = stream::iter(ids.into_iter().enumerate())
        .map(move |(index, message_id)| async move {
            let result = mailbox.message_summary(&message_id).await;
            (index, message_id, result)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(index, message_id, result)| async move {
            match result {
                Ok(summary) => Some((index, summary)),
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Skipping message metadata");
                    None
                }
            }
        })
        .collect()
        .await;

    fetched.sort_by_key(|(index, _)| *index);
    fetched.into_iter().map(|(_, summary)| summary).collect()
}
