//! Live search: stream matching records to the host as they arrive.

use tracing::debug;

use rolodex_connector::error::ConnectorError;
use rolodex_connector::ids::ViewId;
use rolodex_connector::traits::ViewEvent;

use super::{limit_kind, search_error, Event, Step};
use crate::registry::ViewSink;

#[derive(Debug)]
pub struct ViewOp {
    id: ViewId,
    sink: Option<ViewSink>,
    /// Limits end browsing views successfully.
    can_browse: bool,
    delivered: usize,
}

impl ViewOp {
    pub fn new(id: ViewId, sink: ViewSink, can_browse: bool) -> Self {
        Self {
            id,
            sink: Some(sink),
            can_browse,
            delivered: 0,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    /// Show or clear a progress message on this view.
    pub fn status(&self, message: Option<String>) {
        if let Some(sink) = &self.sink {
            sink.send(ViewEvent::Status(message));
        }
    }

    pub(super) fn on_event(&mut self, event: Event) -> Step {
        match event {
            Event::Entry(decoded) => {
                if let Some(sink) = &self.sink {
                    sink.send(ViewEvent::Update(decoded.record));
                    self.delivered += 1;
                }
                Step::Pending
            }
            Event::Done(status) => {
                debug!(view = %self.id, delivered = self.delivered, code = %status.code, "View search finished");
                let result = if status.is_success()
                    || (self.can_browse && limit_kind(&status).is_some())
                {
                    Ok(())
                } else {
                    Err(search_error(&status, "", Vec::new()))
                };
                if let Some(sink) = self.sink.take() {
                    sink.complete(result);
                }
                Step::Finished
            }
        }
    }

    pub(super) fn fail(&mut self, error: ConnectorError) {
        if let Some(sink) = self.sink.take() {
            sink.complete(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResultCode;
    use crate::ops::test_support::{entry, status};
    use rolodex_connector::traits::ViewReceiver;
    use tokio::sync::mpsc;

    fn view(can_browse: bool) -> (ViewOp, ViewReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ViewOp::new(ViewId::new(), ViewSink::new(tx), can_browse), rx)
    }

    #[tokio::test]
    async fn test_view_streams_updates_then_completes() {
        let (mut op, mut rx) = view(false);
        op.on_event(entry("uid=a,dc=example", "Ann A", "A"));
        op.on_event(status(ResultCode::SUCCESS));

        assert!(matches!(rx.recv().await, Some(ViewEvent::Update(_))));
        assert!(matches!(rx.recv().await, Some(ViewEvent::Complete(Ok(())))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_browsing_view_treats_limits_as_success() {
        let (mut op, mut rx) = view(true);
        op.on_event(status(ResultCode::SIZE_LIMIT_EXCEEDED));
        assert!(matches!(rx.recv().await, Some(ViewEvent::Complete(Ok(())))));

        let (mut op, mut rx) = view(false);
        op.on_event(status(ResultCode::TIME_LIMIT_EXCEEDED));
        assert!(matches!(
            rx.recv().await,
            Some(ViewEvent::Complete(Err(ConnectorError::SearchLimitExceeded { .. })))
        ));
    }

    #[tokio::test]
    async fn test_failed_view_completes_once() {
        let (mut op, mut rx) = view(false);
        op.fail(ConnectorError::unavailable("gone"));
        drop(op);

        assert!(matches!(
            rx.recv().await,
            Some(ViewEvent::Complete(Err(ConnectorError::ConnectionUnavailable { .. })))
        ));
        assert!(rx.recv().await.is_none());
    }
}
