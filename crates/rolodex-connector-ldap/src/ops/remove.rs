//! Remove: delete the entry and purge it from the cache.

use tracing::info;

use rolodex_connector::error::ConnectorError;

use super::{Event, OpContext, Request, Step};
use crate::client::map_status;
use crate::registry::Responder;

#[derive(Debug)]
pub struct RemoveOp {
    uid: String,
    reply: Option<Responder<String>>,
}

impl RemoveOp {
    pub fn start(uid: &str, reply: Responder<String>) -> (Self, Request) {
        let op = Self {
            uid: uid.to_string(),
            reply: Some(reply),
        };
        (
            op,
            Request::Delete {
                dn: uid.to_string(),
            },
        )
    }

    pub(super) fn on_event(&mut self, event: Event, ctx: &OpContext<'_>) -> Step {
        let Event::Done(status) = event else {
            return Step::Pending;
        };

        let result = if status.is_success() {
            ctx.cache.remove(&self.uid);
            info!(dn = %self.uid, "Record removed");
            Ok(self.uid.clone())
        } else {
            Err(map_status(&status, &self.uid))
        };
        if let Some(reply) = self.reply.take() {
            reply.send(result);
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
    use rolodex_connector::record::Record;

    #[tokio::test]
    async fn test_remove_purges_cache() {
        let cache = MemoryCache::new();
        cache.put(&Record::contact().with_uid("uid=a,dc=example")).unwrap();
        let config = config();
        let ctx = ctx(&cache, &config);
        let (reply, rx) = Responder::channel();

        let (mut op, request) = RemoveOp::start("uid=a,dc=example", reply);
        assert_eq!(request.target(), "uid=a,dc=example");
        assert!(matches!(op.on_event(status(ResultCode::SUCCESS), &ctx), Step::Finished));

        assert_eq!(rx.await.unwrap().unwrap(), "uid=a,dc=example");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_entry() {
        let cache = MemoryCache::new();
        let config = config();
        let ctx = ctx(&cache, &config);
        let (reply, rx) = Responder::channel();

        let (mut op, _) = RemoveOp::start("uid=gone,dc=example", reply);
        op.on_event(status(ResultCode::NO_SUCH_OBJECT), &ctx);
        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectorError::NotFound { identifier }) if identifier == "uid=gone,dc=example"
        ));
    }
}
