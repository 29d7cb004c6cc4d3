use agent_foreman::models::session::SessionState;
use agent_foreman::notify::{ChannelSink, LogSink, NotificationSink, StateNotification};

#[test]
fn channel_sink_delivers_in_order() {
    let (sink, mut rx) = ChannelSink::new();

    sink.notify("t1", SessionState::Starting);
    sink.notify("t1", SessionState::Running);

    assert_eq!(
        rx.try_recv().expect("first"),
        StateNotification {
            session_id: "t1".into(),
            state: SessionState::Starting,
        }
    );
    assert_eq!(rx.try_recv().expect("second").state, SessionState::Running);
    assert!(rx.try_recv().is_err());
}

#[test]
fn notify_after_receiver_dropped_is_harmless() {
    let (sink, rx) = ChannelSink::new();
    drop(rx);

    sink.notify("t1", SessionState::Stopped);
    LogSink.notify("t1", SessionState::Stopped);
}
