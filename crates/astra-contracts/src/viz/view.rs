use super::store::{TaskPhase, VizStore};

/// What the UI should currently show, derived from the store and the
/// selection. Failed tasks render as documents too; their artifact is the
/// error fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState<'a> {
    Conversation,
    GeneratingViz { message_id: &'a str },
    Document { message_id: &'a str, artifact: &'a str },
}

pub fn current_view(store: &VizStore) -> ViewState<'_> {
    let Some(message_id) = store.selected() else {
        return ViewState::Conversation;
    };
    let Some(task) = store.get(message_id) else {
        return ViewState::Conversation;
    };
    match task.phase {
        TaskPhase::Generating => ViewState::GeneratingViz {
            message_id: &task.message_id,
        },
        TaskPhase::Ready | TaskPhase::Failed => ViewState::Document {
            message_id: &task.message_id,
            artifact: task.artifact.as_deref().unwrap_or_default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{current_view, ViewState};
    use crate::viz::store::{TaskPatch, VizStore};

    #[test]
    fn no_selection_shows_conversation() {
        let store = VizStore::new();
        assert_eq!(current_view(&store), ViewState::Conversation);
    }

    #[test]
    fn selection_without_task_shows_conversation() {
        let mut store = VizStore::new();
        store.select(Some("ghost"));
        assert_eq!(current_view(&store), ViewState::Conversation);
    }

    #[test]
    fn generating_task_shows_progress() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        assert_eq!(
            current_view(&store),
            ViewState::GeneratingViz { message_id: "m1" }
        );
    }

    #[test]
    fn ready_task_shows_document() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.upsert("m1", TaskPatch::ready("<html></html>"));
        assert_eq!(
            current_view(&store),
            ViewState::Document {
                message_id: "m1",
                artifact: "<html></html>",
            }
        );
    }

    #[test]
    fn failed_task_shows_its_fragment_as_document() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.upsert("m1", TaskPatch::failed("<div>went wrong</div>"));
        assert_eq!(
            current_view(&store),
            ViewState::Document {
                message_id: "m1",
                artifact: "<div>went wrong</div>",
            }
        );
    }

    #[test]
    fn back_clears_selection_without_touching_tasks() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.upsert("m1", TaskPatch::ready("<html></html>"));
        store.select(None);

        assert_eq!(current_view(&store), ViewState::Conversation);
        assert!(store.get("m1").is_some());
    }
}
