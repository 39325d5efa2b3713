//! Create: add the new entry, then cache and return the record.

use tracing::{info, warn};

use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::record::Record;

use super::{Event, OpContext, Request, Step};
use crate::client::map_status;
use crate::mapper;
use crate::registry::Responder;

#[derive(Debug)]
pub struct CreateOp {
    record: Record,
    dn: String,
    reply: Option<Responder<Record>>,
}

impl CreateOp {
    /// Build the add request for `record`.
    ///
    /// Fails before anything is sent when the record cannot be stored.
    pub fn start(record: Record, ctx: &OpContext<'_>) -> ConnectorResult<(Self, Request)> {
        let entry = mapper::new_entry(&record, &ctx.config.base_dn, &ctx.caps, ctx.now.timestamp())?;
        let op = Self {
            record,
            dn: entry.dn.clone(),
            reply: None,
        };
        Ok((op, Request::Add(entry)))
    }

    #[must_use]
    pub fn with_reply(mut self, reply: Responder<Record>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub(super) fn on_event(&mut self, event: Event, ctx: &OpContext<'_>) -> Step {
        let Event::Done(status) = event else {
            return Step::Pending;
        };

        if !status.is_success() {
            self.fail(map_status(&status, &self.dn));
            return Step::Finished;
        }

        let mut record = std::mem::take(&mut self.record);
        record.uid = Some(self.dn.clone());
        if let Err(e) = ctx.cache.put(&record) {
            warn!(dn = %self.dn, error = %e, "Failed to cache created record");
        }
        info!(dn = %self.dn, "Record created");

        if let Some(reply) = self.reply.take() {
            reply.send(Ok(record));
        }
        Step::Finished
    }

    pub(super) fn fail(&mut self, error: ConnectorError) {
        if let Some(reply) = self.reply.take() {
            reply.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResultCode;
    use crate::ops::test_support::{config, ctx, status};
    use rolodex_connector::cache::{MemoryCache, OfflineCache};
    use rolodex_connector::record::FieldId;

    fn jane() -> Record {
        Record::contact()
            .with_text(FieldId::FamilyName, "Doe")
            .with_text(FieldId::GivenName, "Jane")
            .with_text(FieldId::FullName, "Jane Doe")
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_caches() {
        let cache = MemoryCache::new();
        let config = config();
        let ctx = ctx(&cache, &config);
        let (reply, rx) = Responder::channel();

        let (op, request) = CreateOp::start(jane(), &ctx).unwrap();
        let mut op = op.with_reply(reply);
        assert_eq!(op.dn(), "uid=doe.1700000000,ou=people,dc=example");
        assert!(matches!(request, Request::Add(ref e) if e.dn == op.dn()));

        assert!(matches!(op.on_event(status(ResultCode::SUCCESS), &ctx), Step::Finished));
        let created = rx.await.unwrap().unwrap();
        assert_eq!(created.uid.as_deref(), Some("uid=doe.1700000000,ou=people,dc=example"));
        assert!(cache.get("uid=doe.1700000000,ou=people,dc=example").is_some());
    }

    #[tokio::test]
    async fn test_create_failure_is_mapped() {
        let cache = MemoryCache::new();
        let config = config();
        let ctx = ctx(&cache, &config);
        let (reply, rx) = Responder::channel();

        let (op, _) = CreateOp::start(jane(), &ctx).unwrap();
        let mut op = op.with_reply(reply);
        op.on_event(status(ResultCode::ALREADY_EXISTS), &ctx);
        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectorError::AlreadyExists { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_list_fails_before_sending() {
        let cache = MemoryCache::new();
        let config = config();
        let ctx = ctx(&cache, &config);
        let result = CreateOp::start(Record::list(), &ctx);
        assert!(matches!(result, Err(ConnectorError::StructuralError { .. })));
    }
}
