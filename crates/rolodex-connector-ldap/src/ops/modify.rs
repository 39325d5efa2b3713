//! Modify: read the current entry, rename it if a naming attribute
//! changes, then apply the remaining changes.

use tracing::{debug, info, warn};

use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::record::Record;

use super::{Event, OpContext, Request, Step};
use crate::client::{map_status, ChangeOp, Modification, SearchRequest};
use crate::mapper::{self, dn, Decoded};
use crate::registry::Responder;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Reading,
    Renaming { new_dn: String },
    Writing,
}

#[derive(Debug)]
pub struct ModifyOp {
    desired: Record,
    /// DN of the entry as it currently stands on the server.
    dn: String,
    stage: Stage,
    current: Option<Decoded>,
    changes: Vec<Modification>,
    reply: Option<Responder<Record>>,
}

impl ModifyOp {
    /// Start by reading the current entry.
    ///
    /// Records without identity and lists without members fail before
    /// anything is sent.
    pub fn start(desired: Record) -> ConnectorResult<(Self, Request)> {
        let dn = desired
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| ConnectorError::structural("record to modify has no identity"))?;
        mapper::check_structure(&desired)?;

        let request = Request::Search(SearchRequest::base_object(dn.clone()));
        let op = Self {
            desired,
            dn,
            stage: Stage::Reading,
            current: None,
            changes: Vec::new(),
            reply: None,
        };
        Ok((op, request))
    }

    #[must_use]
    pub fn with_reply(mut self, reply: Responder<Record>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub(super) fn on_event(&mut self, event: Event, ctx: &OpContext<'_>) -> Step {
        let status = match event {
            Event::Entry(decoded) => {
                if self.stage == Stage::Reading {
                    self.current = Some(decoded);
                }
                return Step::Pending;
            }
            Event::Done(status) => status,
        };

        if !status.is_success() {
            let target = match &self.stage {
                Stage::Renaming { new_dn } => new_dn.clone(),
                _ => self.dn.clone(),
            };
            self.fail(map_status(&status, &target));
            return Step::Finished;
        }

        match std::mem::replace(&mut self.stage, Stage::Writing) {
            Stage::Reading => self.plan(ctx),
            Stage::Renaming { new_dn } => {
                ctx.cache.remove(&self.dn);
                info!(old_dn = %self.dn, new_dn = %new_dn, "Entry renamed");
                self.dn = new_dn;
                self.write_or_finish(ctx)
            }
            Stage::Writing => {
                self.finish(ctx);
                Step::Finished
            }
        }
    }

    /// Diff the current entry against the desired record and pick the next request.
    fn plan(&mut self, ctx: &OpContext<'_>) -> Step {
        let Some(current) = self.current.take() else {
            self.fail(ConnectorError::NotFound {
                identifier: self.dn.clone(),
            });
            return Step::Finished;
        };

        let diff = match mapper::diff(&current.record, &self.desired, &ctx.caps) {
            Ok(diff) => diff,
            Err(e) => {
                self.fail(e);
                return Step::Finished;
            }
        };
        self.changes = diff.changes;

        let missing =
            mapper::missing_object_classes(&current.object_classes, self.desired.is_list, &ctx.caps);
        if !missing.is_empty() {
            self.changes.push(Modification::new(
                ChangeOp::Add,
                "objectClass",
                missing.iter().map(|c| c.as_bytes().to_vec()).collect(),
            ));
        }

        debug!(
            dn = %self.dn,
            changes = self.changes.len(),
            rename = diff.identity_change_needed,
            "Computed modify plan"
        );

        if diff.identity_change_needed {
            let new_rdn = mapper::rename_rdn(
                &self.desired,
                current.ldap_uid.as_deref(),
                &ctx.config.base_dn,
                ctx.now.timestamp(),
            );
            if !dn::same_rdn(&new_rdn, dn::leading_rdn(&self.dn)) {
                let new_dn = dn::full_dn(&new_rdn, dn::parent_dn(&self.dn));
                self.stage = Stage::Renaming { new_dn };
                return Step::Send(Request::Rename {
                    dn: self.dn.clone(),
                    new_rdn,
                });
            }
            debug!(dn = %self.dn, "Entry already carries its target RDN, skipping rename");
        }

        if self.changes.is_empty() {
            if let Some(reply) = self.reply.take() {
                reply.send(Ok(current.record));
            }
            return Step::Finished;
        }

        self.write_or_finish(ctx)
    }

    fn write_or_finish(&mut self, ctx: &OpContext<'_>) -> Step {
        if self.changes.is_empty() {
            self.finish(ctx);
            return Step::Finished;
        }
        self.stage = Stage::Writing;
        Step::Send(Request::Modify {
            dn: self.dn.clone(),
            changes: std::mem::take(&mut self.changes),
        })
    }

    fn finish(&mut self, ctx: &OpContext<'_>) {
        let mut record = std::mem::take(&mut self.desired);
        record.uid = Some(self.dn.clone());
        if let Err(e) = ctx.cache.put(&record) {
            warn!(dn = %self.dn, error = %e, "Failed to cache modified record");
        }
        info!(dn = %self.dn, "Record modified");
        if let Some(reply) = self.reply.take() {
            reply.send(Ok(record));
        }
    }

    pub(super) fn fail(&mut self, error: ConnectorError) {
        if let Some(reply) = self.reply.take() {
            reply.send(Err(error));
        }
    }
}
