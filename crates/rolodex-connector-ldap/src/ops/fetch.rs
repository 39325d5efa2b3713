//! Batch searches: fetch one, fetch many, list identities, cache refresh.

use tracing::{debug, info, warn};

use rolodex_connector::error::ConnectorError;
use rolodex_connector::record::Record;
use rolodex_connector::traits::RefreshOutcome;

use super::{search_error, Event, OpContext, Step};
use crate::client::ResultCode;
use crate::registry::Responder;

/// Who gets the accumulated records.
#[derive(Debug)]
pub enum FetchReply {
    One {
        uid: String,
        reply: Responder<Record>,
    },
    Many(Responder<Vec<Record>>),
    Ids(Responder<Vec<String>>),
    /// Full download into the offline cache; automatic refreshes have no caller.
    Refresh(Option<Responder<RefreshOutcome>>),
}

#[derive(Debug)]
pub struct FetchOp {
    reply: Option<FetchReply>,
    records: Vec<Record>,
    refreshing: bool,
}

impl FetchOp {
    pub fn new(reply: FetchReply) -> Self {
        let refreshing = matches!(reply, FetchReply::Refresh(_));
        Self {
            reply: Some(reply),
            records: Vec::new(),
            refreshing,
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.refreshing
    }

    pub(super) fn status_message(&self) -> Option<String> {
        self.refreshing
            .then(|| format!("Downloading contacts ({})...", self.records.len()))
    }

    pub(super) fn on_event(&mut self, event: Event, ctx: &OpContext<'_>) -> Step {
        match event {
            Event::Entry(decoded) => {
                self.records.push(decoded.record);
                Step::Pending
            }
            Event::Done(status) => {
                let records = std::mem::take(&mut self.records);
                let Some(reply) = self.reply.take() else {
                    return Step::Finished;
                };

                match reply {
                    FetchReply::One { uid, reply } => {
                        let result = if status.is_success() || status.code == ResultCode::PARTIAL_RESULTS {
                            records
                                .into_iter()
                                .next()
                                .ok_or(ConnectorError::NotFound { identifier: uid })
                        } else {
                            Err(search_error(&status, &uid, Vec::new()))
                        };
                        reply.send(result);
                    }
                    FetchReply::Many(reply) => {
                        debug!(count = records.len(), code = %status.code, "Search finished");
                        if status.is_success() {
                            reply.send(Ok(records));
                        } else {
                            reply.send(Err(search_error(&status, "", records)));
                        }
                    }
                    FetchReply::Ids(reply) => {
                        if status.is_success() {
                            reply.send(Ok(records.into_iter().filter_map(|r| r.uid).collect()));
                        } else {
                            reply.send(Err(search_error(&status, "", records)));
                        }
                    }
                    FetchReply::Refresh(reply) => {
                        let result = if status.is_success() {
                            Ok(store_download(records, ctx))
                        } else {
                            warn!(status = %status, "Offline cache download failed");
                            Err(search_error(&status, "", records))
                        };
                        if let Some(reply) = reply {
                            reply.send(result);
                        }
                    }
                }
                Step::Finished
            }
        }
    }

    pub(super) fn fail(&mut self, error: ConnectorError) {
        match self.reply.take() {
            Some(FetchReply::One { reply, .. }) => reply.send(Err(error)),
            Some(FetchReply::Many(reply)) => reply.send(Err(error)),
            Some(FetchReply::Ids(reply)) => reply.send(Err(error)),
            Some(FetchReply::Refresh(Some(reply))) => reply.send(Err(error)),
            Some(FetchReply::Refresh(None)) => {
                warn!(error = %error, "Offline cache download failed");
            }
            None => {}
        }
    }
}

fn store_download(records: Vec<Record>, ctx: &OpContext<'_>) -> RefreshOutcome {
    ctx.cache.clean();
    let mut stored = 0;
    for record in &records {
        match ctx.cache.put(record) {
            Ok(()) => stored += 1,
            Err(e) => warn!(error = %e, "Failed to cache downloaded record"),
        }
    }
    ctx.cache.set_populated(true);
    ctx.cache.set_last_refresh(ctx.now);
    info!(records = stored, "Offline cache refreshed");
    RefreshOutcome::Refreshed { records: stored }
}
