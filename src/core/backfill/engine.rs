use crate::types::traits::LedgerSource;
use crate::types::transaction::SignatureInfo;
use crate::utils::error::Result;
use crate::utils::logging::{log, LogLevel};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Pages a program's signature history back to its checkpoint.
///
/// The ledger lists newest first; pages are walked backwards with the oldest
/// signature of each page as the next cursor until a page reaches the
/// checkpoint or the history runs out. The collected work is returned
/// oldest-first so the worker replays it in ledger order.
///
/// Several signatures can share the checkpoint's slot. Those listed before
/// the checkpoint signature are newer and still collected; the walk stops at
/// the checkpoint signature itself, or at the first older slot.
pub struct BackfillEngine {
    ledger: Arc<dyn LedgerSource>,
    program_id: Pubkey,
    page_size: usize,
    cancellation_token: CancellationToken,
}

impl BackfillEngine {
    pub fn new(
        ledger: Arc<dyn LedgerSource>,
        program_id: Pubkey,
        page_size: usize,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            program_id,
            page_size: page_size.max(1),
            cancellation_token,
        }
    }

    /// Collects every signature newer than the checkpoint, oldest first.
    ///
    /// Without a `checkpoint_signature` the whole checkpoint slot counts as
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns the ledger error of the first page that could not be listed;
    /// nothing collected before it is returned.
    #[tracing::instrument(skip_all, fields(program_id = %self.program_id, checkpoint_height))]
    pub async fn collect(
        &self,
        checkpoint_height: u64,
        checkpoint_signature: Option<&str>,
    ) -> Result<Vec<SignatureInfo>> {
        let mut pending = Vec::new();
        let mut before: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if self.cancellation_token.is_cancelled() {
                log(LogLevel::Warning, "Backfill cancelled while paging signatures");
                break;
            }

            let page = self
                .ledger
                .list_signatures(&self.program_id, before.as_deref(), self.page_size)
                .await?;
            pages += 1;

            let Some(oldest) = page.last().map(|s| s.signature.clone()) else {
                break;
            };
            let page_len = page.len();
            let fresh: Vec<SignatureInfo> = page
                .into_iter()
                .take_while(|s| is_newer(s, checkpoint_height, checkpoint_signature))
                .collect();
            let reached_checkpoint = fresh.len() < page_len;
            pending.extend(fresh);

            if reached_checkpoint || page_len < self.page_size {
                break;
            }
            before = Some(oldest);
        }

        tracing::debug!(pages, signatures = pending.len(), "Backfill paging finished");
        pending.reverse();
        Ok(pending)
    }
}

fn is_newer(info: &SignatureInfo, height: u64, signature: Option<&str>) -> bool {
    match signature {
        _ if info.slot > height => true,
        Some(sig) => info.slot == height && info.signature != sig,
        None => false,
    }
}
