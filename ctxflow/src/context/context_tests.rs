//! Propagation tests across parent/child context nodes.

#[cfg(test)]
mod tests {
    use crate::codec::{HeaderCodec, HeaderMap, SpanContext, BAGGAGE_HEADER, TRACEPARENT_HEADER};
    use crate::context::{registry, ContextNode, DataValue, Phase};
    use crate::engine::ContextEngine;
    use crate::errors::ContextError;
    use crate::policy::{DownMode, PropagationPolicy, UpMode};
    use crate::tags::{MockTagBridge, NoOpTagScope, TagBridge, TagScope, TagSet};
    use crate::testing::{RecordingTagBridge, TagEvent};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn policy() -> Arc<PropagationPolicy> {
        Arc::new(
            PropagationPolicy::builder()
                .with_down_mode("tenant", DownMode::ProcessLocal)
                .with_tag("tenant", true)
                .with_up_mode("requestId", UpMode::ProcessLocal)
                .with_down_mode("shared", DownMode::ProcessLocal)
                .with_up_mode("shared", UpMode::ProcessLocal)
                .build(),
        )
    }

    fn str_value(text: &str) -> Option<DataValue> {
        Some(DataValue::from(text))
    }

    fn enter_on_other_thread(parent: &Arc<ContextNode>) -> Arc<ContextNode> {
        let parent = Arc::clone(parent);
        thread::spawn(move || {
            let policy = Arc::clone(parent.policy());
            ContextNode::enter(Some(&parent), &policy)
        })
        .join()
        .unwrap()
    }

    fn active_root() -> Arc<ContextNode> {
        let root = ContextNode::enter(None, &policy());
        root.set_value("tenant", "acme").unwrap();
        root.make_active().unwrap();
        root
    }

    #[test]
    fn test_tenant_and_request_id() {
        let root = active_root();

        let first = ContextNode::enter(Some(&root), &policy());
        assert!(first.is_synchronous());
        first.make_active().unwrap();
        first.set_value("requestId", "r1").unwrap();
        first.close().unwrap();

        assert_eq!(root.get("requestId").unwrap(), str_value("r1"));

        let second = ContextNode::enter(Some(&root), &policy());
        assert_eq!(second.get("tenant").unwrap(), str_value("acme"));
        assert_eq!(second.get("requestId").unwrap(), None);

        second.make_active().unwrap();
        second.close().unwrap();
        root.close().unwrap();
    }

    #[test]
    fn test_child_writes_do_not_leak_down_or_up() {
        let root = active_root();

        let child = ContextNode::enter(Some(&root), &policy());
        child.make_active().unwrap();
        child.set_value("tenant", "other").unwrap();
        child.set_value("local", 1i32).unwrap();
        child.close().unwrap();

        assert_eq!(root.get("tenant").unwrap(), str_value("acme"));
        assert_eq!(root.get("local").unwrap(), None);

        let sibling = ContextNode::enter(Some(&root), &policy());
        assert_eq!(sibling.get("tenant").unwrap(), str_value("acme"));
        sibling.make_active().unwrap();
        sibling.close().unwrap();
        root.close().unwrap();
    }

    #[test]
    fn test_grandchild_sees_parent_override() {
        let root = active_root();
        let child = ContextNode::enter(Some(&root), &policy());
        child.set_value("tenant", "beta").unwrap();
        child.make_active().unwrap();

        let grandchild = ContextNode::enter(Some(&child), &policy());
        assert!(grandchild.is_synchronous());
        assert_eq!(grandchild.get("tenant").unwrap(), str_value("beta"));

        grandchild.make_active().unwrap();
        grandchild.close().unwrap();
        child.close().unwrap();
        root.close().unwrap();
    }

    #[test]
    fn test_write_while_active_reaches_later_sync_children() {
        let root = active_root();

        let before = ContextNode::enter(Some(&root), &policy());
        root.set_value("tenant", "changed").unwrap();
        let after = ContextNode::enter(Some(&root), &policy());

        assert_eq!(before.get("tenant").unwrap(), str_value("acme"));
        assert_eq!(after.get("tenant").unwrap(), str_value("changed"));
    }

    #[test]
    fn test_async_child_sees_post_entry_snapshot() {
        let root = active_root();
        root.set_value("tenant", "changed").unwrap();

        let async_child = enter_on_other_thread(&root);
        assert!(!async_child.is_synchronous());
        assert_eq!(async_child.get("tenant").unwrap(), str_value("acme"));

        let sync_child = ContextNode::enter(Some(&root), &policy());
        assert_eq!(sync_child.get("tenant").unwrap(), str_value("changed"));
    }

    #[test]
    fn test_child_of_entry_phase_parent_is_async() {
        let root = ContextNode::enter(None, &policy());
        root.set_value("tenant", "acme").unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        assert!(!child.is_synchronous());
        assert_eq!(child.get("tenant").unwrap(), None);

        child.make_active().unwrap();
        child.set_value("requestId", "r1").unwrap();
        child.close().unwrap();
        assert_eq!(root.get("requestId").unwrap(), None);
    }

    #[test]
    fn test_async_sibling_unaffected_by_sync_up_propagation() {
        let root = active_root();
        let async_child = enter_on_other_thread(&root);

        let sync_child = ContextNode::enter(Some(&root), &policy());
        sync_child.make_active().unwrap();
        sync_child.set_value("shared", 7i64).unwrap();
        sync_child.close().unwrap();

        assert_eq!(root.get("shared").unwrap(), Some(DataValue::I64(7)));
        assert_eq!(async_child.get("shared").unwrap(), None);

        let later_sync = ContextNode::enter(Some(&root), &policy());
        assert_eq!(later_sync.get("shared").unwrap(), Some(DataValue::I64(7)));

        let later_async = enter_on_other_thread(&root);
        assert_eq!(later_async.get("shared").unwrap(), None);
    }

    #[test]
    fn test_async_child_does_not_up_propagate() {
        let root = active_root();
        let worker = {
            let root = Arc::clone(&root);
            thread::spawn(move || {
                let policy = Arc::clone(root.policy());
                let child = ContextNode::enter(Some(&root), &policy);
                child.make_active().unwrap();
                assert_eq!(
                    registry::current().map(|n| n.id()),
                    Some(child.id())
                );
                child.set_value("requestId", "from-worker").unwrap();
                child.set_value("shared", true).unwrap();
                child.close()
            })
        };
        worker.join().unwrap().unwrap();

        assert_eq!(root.get("requestId").unwrap(), None);
        assert_eq!(root.get("shared").unwrap(), None);
        assert_eq!(registry::current().map(|n| n.id()), Some(root.id()));
        root.close().unwrap();
    }

    #[test]
    fn test_tombstone_propagates_up_over_ancestor_value() {
        let root = ContextNode::enter(None, &policy());
        root.set_value("shared", "root").unwrap();
        root.make_active().unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        assert_eq!(child.get("shared").unwrap(), str_value("root"));
        child.make_active().unwrap();
        child.remove("shared").unwrap();
        assert_eq!(child.get("shared").unwrap(), None);
        child.close().unwrap();

        assert_eq!(root.get("shared").unwrap(), None);
        let next = ContextNode::enter(Some(&root), &policy());
        assert_eq!(next.get("shared").unwrap(), None);
    }

    #[test]
    fn test_sequential_children_accumulate_up_propagated_values() {
        const CHILDREN: usize = 5;
        let keys: Vec<String> = (0..CHILDREN).map(|i| format!("k{i}")).collect();
        let policy = Arc::new(keys.iter().fold(PropagationPolicy::builder(), |b, key| {
            b.with_down_mode(key.as_str(), DownMode::ProcessLocal)
                .with_up_mode(key.as_str(), UpMode::ProcessLocal)
        })
        .build());

        let root = ContextNode::enter(None, &policy);
        root.make_active().unwrap();

        for (i, key) in keys.iter().enumerate() {
            let child = ContextNode::enter(Some(&root), &policy);
            for earlier in &keys[..i] {
                assert!(child.get(earlier).unwrap().is_some(), "missing {earlier}");
            }
            child.make_active().unwrap();
            child.set_value(key.as_str(), i as i32).unwrap();
            child.close().unwrap();
        }

        let last = ContextNode::enter(Some(&root), &policy);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(last.get(key).unwrap(), Some(DataValue::I32(i as i32)));
        }
    }

    #[test]
    fn test_close_after_parent_closed_out_of_order() {
        let root = active_root();
        let child = ContextNode::enter(Some(&root), &policy());
        child.make_active().unwrap();

        let err = root.close().unwrap_err();
        assert!(matches!(err, ContextError::DetachMismatch { .. }));
        assert_eq!(root.phase(), Phase::Closed);

        // The whole stack above the root was unwound with it.
        assert!(registry::current().is_none());

        child.set_value("requestId", "late").unwrap();
        child.close().unwrap();
        assert_eq!(child.phase(), Phase::Closed);
        assert_eq!(
            root.get("requestId"),
            Err(ContextError::Closed { node_id: root.id() })
        );
        assert!(registry::current().is_none());

        let engine = ContextEngine::default();
        let next = engine.enter();
        assert!(next.parent().is_none());
        assert_eq!(next.get("tenant").unwrap(), None);
    }

    #[test]
    fn test_child_of_exit_phase_parent_is_sync() {
        let root = active_root();
        root.begin_exit().unwrap();
        root.set_value("tenant", "exiting").unwrap();

        let first = ContextNode::enter(Some(&root), &policy());
        let second = ContextNode::enter(Some(&root), &policy());
        assert!(first.is_synchronous());
        assert!(second.is_synchronous());
        assert_eq!(first.get("tenant").unwrap(), str_value("exiting"));
        assert_eq!(second.get("tenant").unwrap(), str_value("exiting"));
    }

    #[test]
    fn test_up_propagation_into_exit_phase_parent() {
        let root = active_root();
        root.begin_exit().unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        child.make_active().unwrap();
        child.set_value("requestId", "r-exit").unwrap();
        child.set_value("shared", 3i32).unwrap();
        child.close().unwrap();

        assert_eq!(root.phase(), Phase::Exit);
        assert_eq!(root.get("requestId").unwrap(), str_value("r-exit"));
        assert_eq!(root.get("shared").unwrap(), Some(DataValue::I32(3)));

        let next = ContextNode::enter(Some(&root), &policy());
        assert_eq!(next.get("shared").unwrap(), Some(DataValue::I32(3)));
        root.close().unwrap();
    }

    #[test]
    fn test_non_propagated_key_isolated_in_every_phase() {
        for phase in [Phase::Entry, Phase::Active, Phase::Exit] {
            let root = ContextNode::enter(None, &policy());
            if phase.is_open() {
                root.make_active().unwrap();
            }
            if phase == Phase::Exit {
                root.begin_exit().unwrap();
            }
            assert_eq!(root.phase(), phase);
            root.set_value("local", "secret").unwrap();
            root.set_value("tenant", "acme").unwrap();

            let async_child = enter_on_other_thread(&root);
            assert!(!async_child.is_synchronous());
            assert_eq!(async_child.get("local").unwrap(), None, "async child, parent {phase}");

            let same_thread = ContextNode::enter(Some(&root), &policy());
            assert_eq!(same_thread.is_synchronous(), phase.is_open());
            assert_eq!(same_thread.get("local").unwrap(), None, "same-thread child, parent {phase}");
            if phase.is_open() {
                assert_eq!(same_thread.get("tenant").unwrap(), str_value("acme"));
            }

            if phase.is_open() {
                root.close().unwrap();
            }
            assert!(registry::current().is_none());
        }
    }

    #[test]
    fn test_close_after_parent_dropped() {
        let root = ContextNode::enter(None, &policy());
        root.set_value("tenant", "acme").unwrap();
        let child = ContextNode::enter(Some(&root), &policy());
        drop(root);

        assert!(child.parent().is_none());
        assert_eq!(child.get("tenant").unwrap(), None);
        child.make_active().unwrap();
        child.set_value("requestId", "orphan").unwrap();
        child.close().unwrap();
    }

    #[test]
    fn test_remote_parent_span_stays_on_reading_node() {
        let codec = HeaderCodec::new();
        let span = SpanContext::new(0x1234, 0x5678, true);
        let mut headers = HeaderMap::new();
        headers.insert(BAGGAGE_HEADER.to_string(), "tenant=acme".to_string());
        headers.insert(
            TRACEPARENT_HEADER.to_string(),
            format!("00-{}-{}-01", span.trace_id_hex(), span.span_id_hex()),
        );

        let root = ContextNode::enter(None, &policy());
        root.read_down_propagation_headers(&codec, &headers).unwrap();
        assert_eq!(root.remote_parent_span_context().unwrap(), Some(span));
        root.make_active().unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        assert_eq!(child.get("tenant").unwrap(), str_value("acme"));
        assert_eq!(child.remote_parent_span_context().unwrap(), None);

        let out = child.down_propagation_headers(&codec, None).unwrap();
        assert_eq!(out.get(BAGGAGE_HEADER).map(String::as_str), Some("tenant=acme"));
        assert!(!out.contains_key(TRACEPARENT_HEADER));
    }

    #[test]
    fn test_explicit_span_wins_over_remote_parent() {
        let codec = HeaderCodec::new();
        let remote = SpanContext::new(1, 2, true);
        let current = SpanContext::new(1, 3, true);
        let root = ContextNode::enter(None, &policy());
        root.set(
            crate::context::REMOTE_PARENT_SPAN_CONTEXT_KEY,
            Some(DataValue::opaque(remote)),
        )
        .unwrap();

        let out = root.down_propagation_headers(&codec, Some(&current)).unwrap();
        assert_eq!(codec.decode(&out).span_context, Some(current));
    }

    #[test]
    fn test_opaque_values_stay_off_the_wire() {
        #[derive(Debug)]
        struct Session;

        let codec = HeaderCodec::new();
        let root = ContextNode::enter(None, &policy());
        root.set("tenant", Some(DataValue::opaque(Session))).unwrap();
        root.make_active().unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        let value = child.get("tenant").unwrap().unwrap();
        assert!(value.downcast_ref::<Session>().is_some());
        assert!(child.down_propagation_headers(&codec, None).unwrap().is_empty());
    }

    #[test]
    fn test_root_copies_ambient_tags() {
        let bridge = RecordingTagBridge::with_ambient(vec![
            ("region".to_string(), "eu".to_string()),
            ("tenant".to_string(), "acme".to_string()),
        ]);
        let root = ContextNode::enter_with_bridge(None, &policy(), Some(Arc::new(bridge.clone())));

        assert_eq!(root.get("region").unwrap(), str_value("eu"));
        assert_eq!(root.policy().down_mode("region"), DownMode::ProcessLocal);
        assert!(root.policy().is_tag("region"));
        // Already configured keys keep their settings.
        assert_eq!(root.policy().up_mode("tenant"), UpMode::None);

        root.make_active().unwrap();
        root.close().unwrap();
        assert_eq!(bridge.opened_count(), 1);
        assert_eq!(bridge.events().last(), Some(&TagEvent::Closed));
    }

    #[test]
    fn test_tag_scope_opened_only_on_change() {
        let mut mock = MockTagBridge::new();
        mock.expect_current_tags().times(1).returning(TagSet::new);
        mock.expect_open_scope()
            .withf(|tags: &TagSet| tags == &vec![("tenant".to_string(), "acme".to_string())])
            .times(1)
            .returning(|_| Box::new(NoOpTagScope) as Box<dyn TagScope>);
        mock.expect_open_scope()
            .withf(|tags: &TagSet| tags == &vec![("tenant".to_string(), "beta".to_string())])
            .times(1)
            .returning(|_| Box::new(NoOpTagScope) as Box<dyn TagScope>);
        let bridge: Arc<dyn TagBridge> = Arc::new(mock);

        let root = ContextNode::enter_with_bridge(None, &policy(), Some(bridge));
        root.set_value("tenant", "acme").unwrap();
        root.make_active().unwrap();

        let unchanged = ContextNode::enter(Some(&root), &policy());
        unchanged.make_active().unwrap();
        unchanged.close().unwrap();

        let same_value = ContextNode::enter(Some(&root), &policy());
        same_value.set_value("tenant", "acme").unwrap();
        same_value.make_active().unwrap();
        same_value.close().unwrap();

        let non_tag = ContextNode::enter(Some(&root), &policy());
        non_tag.set_value("requestId", "r1").unwrap();
        non_tag.make_active().unwrap();
        non_tag.close().unwrap();

        let changed = ContextNode::enter(Some(&root), &policy());
        changed.set_value("tenant", "beta").unwrap();
        changed.make_active().unwrap();
        changed.close().unwrap();

        root.close().unwrap();
    }

    #[test]
    fn test_tag_scopes_nest_with_contexts() {
        let bridge = RecordingTagBridge::new();
        let root = ContextNode::enter_with_bridge(None, &policy(), Some(Arc::new(bridge.clone())));
        root.set_value("tenant", "acme").unwrap();
        root.make_active().unwrap();

        let child = ContextNode::enter(Some(&root), &policy());
        child.set_value("tenant", "beta").unwrap();
        child.make_active().unwrap();
        child.close().unwrap();
        root.close().unwrap();

        let tenant = |v: &str| vec![("tenant".to_string(), v.to_string())];
        assert_eq!(
            bridge.events(),
            vec![
                TagEvent::Opened(tenant("acme")),
                TagEvent::Opened(tenant("beta")),
                TagEvent::Closed,
                TagEvent::Closed,
            ]
        );
    }
}
