//! Modem correlation queue behaviour against the scripted mock transport
//!
//! All tests run on a paused clock, so deadlines and cooldowns are checked
//! against virtual time recorded by the mock on every write.

use std::sync::Arc;
use std::time::Duration;

use insteon_transport::mock::{echo_of, echo_with};
use insteon_transport::{
    Address, FlowControlTransport, GetImConfig, GetImInfo, InboundPacket, MockTransport,
    ModemConfig, ModemInfo, PacketFilter, PacketType, Request, ScriptedReply, SendAllLink,
    Timing, TransportError,
};

const MODEM_INFO: [u8; 6] = [0x11, 0x22, 0x33, 0x03, 0x15, 0x9E];

fn answering_modem() -> Arc<MockTransport> {
    Arc::new(MockTransport::with_responder(|frame| match frame {
        [0x02, 0x60] => vec![ScriptedReply::after(5, echo_with(0x60, &MODEM_INFO, true))],
        [0x02, 0x73] => vec![ScriptedReply::after(5, echo_with(0x73, &[0x40, 0, 0], true))],
        _ => vec![ScriptedReply::after(5, echo_of(frame, true))],
    }))
}

#[tokio::test(start_paused = true)]
async fn get_info_resolves_from_echo() {
    let mock = answering_modem();
    let flow = FlowControlTransport::new(mock.clone(), Timing::default());

    let info: ModemInfo = flow.query(&GetImInfo).await.unwrap();
    assert_eq!(info.address, Address::new(0x11, 0x22, 0x33));
    assert_eq!(info.category, 0x03);
    assert_eq!(info.subcategory, 0x15);
    assert_eq!(info.firmware, 0x9E);
    assert_eq!(flow.pending(), 0);
    assert_eq!(mock.frames(), vec![vec![0x02, 0x60]]);
}

#[tokio::test(start_paused = true)]
async fn requests_are_written_in_submission_order() {
    let mock = answering_modem();
    let flow = FlowControlTransport::new(mock.clone(), Timing::default());

    let (a, b, c) = tokio::join!(
        flow.send(&GetImInfo),
        flow.send(&GetImConfig),
        flow.send_frame(insteon_transport::CommandFrame::new(0x6D, &[])),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let ops: Vec<u8> = mock.frames().iter().map(|f| f[1]).collect();
    assert_eq!(ops, vec![0x60, 0x73, 0x6D]);
}

#[tokio::test(start_paused = true)]
async fn burst_of_requests_is_single_flight() {
    let mock = answering_modem();
    let timing = Timing::default();
    let flow = FlowControlTransport::new(mock.clone(), timing.clone());

    let opcodes: Vec<u8> = (0..8).map(|i| if i % 2 == 0 { 0x6D } else { 0x6E }).collect();
    let results = futures::future::join_all(
        opcodes
            .iter()
            .map(|&op| flow.send_frame(insteon_transport::CommandFrame::new(op, &[]))),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let writes = mock.writes();
    let written: Vec<u8> = writes.iter().map(|w| w.frame[1]).collect();
    assert_eq!(written, opcodes);
    // Each echo arrives 5 ms after its write, then the cooldown runs
    for pair in writes.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(5) + timing.gateway_cooldown());
    }
}

#[tokio::test(start_paused = true)]
async fn cooldown_separates_consecutive_writes() {
    let mock = answering_modem();
    let timing = Timing::default();
    let flow = FlowControlTransport::new(mock.clone(), timing.clone());

    let _: ModemInfo = flow.query(&GetImInfo).await.unwrap();
    let _: ModemConfig = flow.query(&GetImConfig).await.unwrap();

    let writes = mock.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[1].at - writes[0].at >= timing.gateway_cooldown());
}

#[tokio::test(start_paused = true)]
async fn second_request_waits_for_first_timeout() {
    // GET_IM_INFO is never answered; GET_IM_CONFIG is.
    let mock = Arc::new(MockTransport::with_responder(|frame| match frame {
        [0x02, 0x73] => vec![ScriptedReply::now(echo_with(0x73, &[0, 0, 0], true))],
        _ => vec![],
    }));
    let timing = Timing::default();
    let flow = FlowControlTransport::new(mock.clone(), timing.clone());

    let (a, b) = tokio::join!(flow.send(&GetImInfo), flow.send(&GetImConfig));
    assert_eq!(a, Err(TransportError::LocalTimeout { opcode: 0x60 }));
    assert!(b.is_ok());

    let writes = mock.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[1].at - writes[0].at >= timing.local_timeout());
    assert_eq!(flow.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_echo_does_not_resolve_a_later_request() {
    let mut calls = 0;
    let mock = Arc::new(MockTransport::with_responder(move |frame| {
        calls += 1;
        match (frame, calls) {
            // First attempt goes unanswered
            ([0x02, 0x60], 1) => vec![],
            ([0x02, 0x60], _) => vec![ScriptedReply::after(20, echo_with(0x60, &MODEM_INFO, true))],
            _ => vec![],
        }
    }));
    let flow = FlowControlTransport::new(mock.clone(), Timing::default());

    let first: Result<ModemInfo, _> = flow.query(&GetImInfo).await;
    assert_eq!(first, Err(TransportError::LocalTimeout { opcode: 0x60 }));

    // Stale echo with different data arrives after the deadline
    mock.inject(echo_with(0x60, &[0xDE, 0xAD, 0x00, 0x00, 0x00, 0x00], true));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(flow.router().listener_count(), 0);

    let second: ModemInfo = flow.query(&GetImInfo).await.unwrap();
    assert_eq!(second.address, Address::new(0x11, 0x22, 0x33));
}

#[tokio::test(start_paused = true)]
async fn nak_echo_is_not_acked() {
    let mock = Arc::new(MockTransport::with_responder(|frame| {
        vec![ScriptedReply::now(echo_of(frame, false))]
    }));
    let flow = FlowControlTransport::new(mock, Timing::default());

    let err = flow.send(&GetImConfig).await.unwrap_err();
    assert_eq!(err, TransportError::NotAcked { opcode: 0x73 });
}

#[tokio::test(start_paused = true)]
async fn lone_nak_means_busy() {
    let mock = Arc::new(MockTransport::with_responder(|_| {
        vec![ScriptedReply::after(3, InboundPacket::Busy)]
    }));
    let flow = FlowControlTransport::new(mock, Timing::default());

    let err = flow.send(&GetImInfo).await.unwrap_err();
    assert_eq!(err, TransportError::Busy { opcode: 0x60 });
}

#[tokio::test(start_paused = true)]
async fn write_failure_resolves_immediately_and_queue_continues() {
    let mock = answering_modem();
    let flow = FlowControlTransport::new(mock.clone(), Timing::default());

    mock.set_fail_writes(true);
    let err = flow.send(&GetImInfo).await.unwrap_err();
    assert!(matches!(err, TransportError::WriteFailed(_)));
    assert_eq!(flow.pending(), 0);

    mock.set_fail_writes(false);
    assert!(flow.send(&GetImInfo).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn reply_is_awaited_after_echo() {
    let mock = Arc::new(MockTransport::with_responder(|frame| match frame {
        [0x02, 0x61, ..] => vec![
            ScriptedReply::now(echo_of(frame, true)),
            ScriptedReply::after(400, InboundPacket::CleanupStatus { ack: true }),
        ],
        _ => vec![],
    }));
    let flow = FlowControlTransport::new(mock, Timing::default());

    let request = Request::new(insteon_transport::ModemCommand::build(&SendAllLink {
        group: 1,
        cmd1: 0x11,
        cmd2: 0xFF,
    }))
    .with_reply(PacketFilter::new(PacketType::CleanupStatus));
    let exchange = flow.submit(request).await.unwrap();
    assert!(exchange.echo.is_some());
    assert_eq!(exchange.reply, Some(InboundPacket::CleanupStatus { ack: true }));
}

#[tokio::test(start_paused = true)]
async fn missing_reply_is_a_remote_timeout() {
    let mock = Arc::new(MockTransport::with_responder(|frame| {
        vec![ScriptedReply::now(echo_of(frame, true))]
    }));
    let timing = Timing::default();
    let flow = FlowControlTransport::new(mock, timing.clone());

    let started = tokio::time::Instant::now();
    let request = Request::new(insteon_transport::ModemCommand::build(&SendAllLink {
        group: 1,
        cmd1: 0x13,
        cmd2: 0x00,
    }))
    .with_reply(PacketFilter::new(PacketType::CleanupStatus));
    let err = flow.submit(request).await.unwrap_err();
    assert_eq!(err, TransportError::RemoteTimeout { opcode: 0x61 });
    assert!(started.elapsed() >= timing.remote_timeout());
}
