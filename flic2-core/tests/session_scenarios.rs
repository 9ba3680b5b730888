mod common;

use std::sync::Arc;

use common::{paired_record, Harness, Seen, SimButton, ADDRESS, DEVICE_RANDOM};
use flic2_core::chaskey::Subkeys;
use flic2_core::handshake;
use flic2_core::protocol::{rx, tx, Packet};
use flic2_core::session::SessionState;
use flic2_core::{
    AddressType, BdAddr, ButtonEvent, ClickKind, ConnectionState, DeviceRecord, Failure,
    FirmwareCheck, GenuineCheck, SessionConfig, Timer,
};

fn unpaired_record() -> DeviceRecord {
    DeviceRecord::new(BdAddr::from_wire(ADDRESS))
}

fn state(h: &Harness) -> SessionState {
    h.button.session().expect("session").state()
}

#[test]
fn quick_reconnect_establishes_and_requests_init() {
    let mut h = Harness::new(paired_record());
    h.connect();
    assert_eq!(h.button.connection_state(), ConnectionState::ConnectedStarting);
    let sent = h.take_sent();
    let req = tx::QuickVerifyRequest::decode(&sent[0][1..]).unwrap();

    h.sim.use_keys(handshake::quick_verify_subkeys(
        &paired_record().pairing.unwrap().key,
        &req.random,
        &DEVICE_RANDOM,
    ));
    h.deliver_signed(&rx::QuickVerifyResponse {
        random: DEVICE_RANDOM,
        tmp_id: req.tmp_id,
    });

    let session = h.button.session().unwrap();
    assert!(session.is_established());
    assert!(session.is_quick_verified());
    assert_eq!(h.button.connection_state(), ConnectionState::ConnectedReady);

    let sent = h.take_signed();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, tx::INIT_BUTTON_EVENTS_LIGHT_REQUEST);
    let init = tx::InitButtonEventsLightRequest::decode(&sent[0].1).unwrap();
    assert_eq!(init.max_queued_packets, 31);
    assert_eq!(init.max_queued_packets_age, 0xfffff);
    assert_eq!(init.auto_disconnect_time, 511);
    assert_eq!(h.recorder.seen(), vec![Seen::Connect]);
    assert_eq!(h.log.borrow().bonds, 0);
}

#[test]
fn quick_verify_with_wrong_keys_fails() {
    let mut h = Harness::new(paired_record());
    h.connect();
    let sent = h.take_sent();
    let req = tx::QuickVerifyRequest::decode(&sent[0][1..]).unwrap();
    h.sim.use_keys(Subkeys::generate(&[0; 16]));
    h.deliver_signed(&rx::QuickVerifyResponse {
        random: DEVICE_RANDOM,
        tmp_id: req.tmp_id,
    });

    assert_eq!(state(&h), SessionState::Failed);
    assert_eq!(h.recorder.failures(), vec![Failure::QuickVerifySignatureMismatch]);
    assert!(h.take_sent().is_empty());
}

#[test]
fn post_init_after_quick_verify() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    let ops = h.finish_init(77, 4);
    assert_eq!(
        ops,
        vec![
            tx::SET_NAME_REQUEST,
            tx::SET_CONNECTION_PARAMETERS_IND,
            tx::GET_BATTERY_LEVEL_REQUEST
        ]
    );

    let record = h.button.record().clone();
    assert_eq!(record.boot_id, 77);
    assert_eq!(record.event_count, 4);
    assert_eq!(h.store.get(&record.key()).unwrap().boot_id, 77);
    assert!(h.recorder.seen().contains(&Seen::Ready(5000)));
    assert_eq!(h.button.ready_timestamp_ms(), 5000);
    {
        let log = h.log.borrow();
        assert_eq!(log.timers.get(&Timer::FirmwareCheck), Some(&0));
        assert_eq!(log.timers.get(&Timer::BatteryPoll), None);
    }

    let level = rx::GetBatteryLevelResponse { level: 1024 };
    h.deliver_signed(&level);
    assert!(h.recorder.seen().contains(&Seen::Battery(level.voltage())));
    assert!((level.voltage() - 3.6).abs() < 1e-4);
    assert_eq!(
        h.log.borrow().timers.get(&Timer::BatteryPoll),
        Some(&(3 * 60 * 60 * 1000))
    );
    assert!(h.store.get(&record.key()).unwrap().battery.is_some());
}

#[test]
fn full_verify_pairs_and_persists_credential() {
    let mut h = Harness::new(unpaired_record());
    h.log.borrow_mut().now = 1_700_000_000_000;
    let secret = h.establish_full();

    assert!(h.button.session().unwrap().is_established());
    assert!(!h.button.session().unwrap().is_quick_verified());
    assert_eq!(h.log.borrow().bonds, 1);
    assert_eq!(h.log.borrow().paired, 1);

    let record = h.button.record().clone();
    assert_eq!(record.pairing, Some(handshake::pairing_credential(&secret)));
    assert_eq!(record.uuid, Some(uuid::Uuid::from_bytes([0xcd; 16])));
    assert_eq!(record.name, "hall");
    assert_eq!(record.serial_number.as_deref(), Some("BA12-C34567"));
    assert_eq!(record.firmware_version, 9);
    assert_eq!(record.address_type, Some(AddressType::Public));
    let battery = record.battery.unwrap();
    assert_eq!(
        battery.voltage,
        rx::GetBatteryLevelResponse { level: 900 }.voltage()
    );
    assert_eq!(battery.timestamp_utc_ms, 1_700_000_000_000);
    assert_eq!(h.store.get(&record.key()), Some(&record));

    let sent = h.take_signed();
    let init = tx::InitButtonEventsLightRequest::decode(&sent[0].1).unwrap();
    assert_eq!(init.max_queued_packets, 0);
    h.deliver_signed(&rx::InitButtonEventsResponse {
        has_queued_events: false,
        timestamp: 5 * 32768,
        event_count: 0,
        boot_id: 5,
    });
    assert_eq!(
        h.opcodes(),
        vec![
            tx::SET_ADV_PARAMETERS_REQUEST,
            tx::SET_NAME_REQUEST,
            tx::SET_CONNECTION_PARAMETERS_IND
        ]
    );
    let log = h.log.borrow();
    assert_eq!(log.timers.get(&Timer::BatteryPoll), Some(&30_000));
    assert_eq!(log.timers.get(&Timer::FirmwareCheck), Some(&30_000));
    let seen = h.recorder.seen();
    let ready = seen.iter().position(|s| *s == Seen::Ready(5000)).unwrap();
    assert_eq!(seen[ready + 1], Seen::Battery(battery.voltage));
}

#[test]
fn certificate_from_unknown_vendor_is_rejected() {
    let sim = SimButton::new();
    let mut h = Harness::with_config(unpaired_record(), sim, Arc::new(SessionConfig::default()));
    h.connect();
    let sent = h.take_sent();
    let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;
    let fvr1 = h.sim.full_verify_response_1(tmp_id);
    h.deliver(&fvr1);

    assert_eq!(
        h.recorder.failures(),
        vec![Failure::GenuineCheckFailed(GenuineCheck::InvalidCertificate)]
    );
    assert_eq!(state(&h), SessionState::Failed);
    assert!(h.take_sent().is_empty());
    assert_eq!(h.log.borrow().bonds, 0);
}

#[test]
fn response_from_other_address_is_rejected() {
    let mut h = Harness::new(unpaired_record());
    h.connect();
    let sent = h.take_sent();
    let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;
    let other = [0xee; 6];
    let fvr1 = rx::FullVerifyResponse1 {
        tmp_id,
        signature: h.sim.certificate(&other, false),
        address: other,
        address_type_random: false,
        public_key: h.sim.public_key(),
        random: DEVICE_RANDOM,
    };
    h.deliver(&fvr1.encode());

    assert_eq!(
        h.recorder.failures(),
        vec![Failure::GenuineCheckFailed(GenuineCheck::UnexpectedAddress)]
    );
}

#[test]
fn response_for_other_tmp_id_is_ignored() {
    let mut h = Harness::new(unpaired_record());
    h.connect();
    let sent = h.take_sent();
    let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;
    let fvr1 = h.sim.full_verify_response_1(tmp_id.wrapping_add(1));
    h.deliver(&fvr1);

    assert_eq!(state(&h), SessionState::WaitFullVerify1);
    assert!(h.take_sent().is_empty());
    assert!(h.recorder.failures().is_empty());
}

#[test]
fn button_not_in_pairable_mode() {
    let mut h = Harness::new(unpaired_record());
    h.connect();
    let sent = h.take_sent();
    let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;
    let fvr1 = h.sim.full_verify_response_1(tmp_id);
    h.deliver(&fvr1);
    assert_eq!(state(&h), SessionState::WaitFullVerify2);

    h.deliver(
        &rx::FullVerifyFailResponse {
            reason: rx::FullVerifyFailResponse::NOT_IN_PAIRABLE_MODE,
        }
        .encode(),
    );
    assert_eq!(h.recorder.failures(), vec![Failure::NotInPairableMode]);
    assert_eq!(h.button.record().pairing, None);
    assert_eq!(h.log.borrow().paired, 0);
}

#[test]
fn tampered_packet_fails_session() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.take_signed();

    let mut packet = h.sim.sign(&rx::ButtonNotification {
        event_counter: 1,
        items: vec![rx::ButtonEventItem {
            timestamp: 100,
            encoded: 1,
            was_queued: false,
            was_queued_last: false,
        }],
    });
    packet[6] ^= 0x01;
    h.deliver(&packet);

    let sent = h.take_signed();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, tx::DISCONNECT_VERIFIED_LINK_IND);
    assert_eq!(h.recorder.failures(), vec![Failure::PacketSignatureMismatch]);
    assert_eq!(h.log.borrow().restarts, vec![5_000]);
    assert_eq!(state(&h), SessionState::Failed);
    assert!(h.recorder.events().is_empty());

    h.deliver_signed(&rx::PingRequest);
    assert!(h.take_sent().is_empty());
}

#[test]
fn revoked_credential_unpairs() {
    let mut h = Harness::new(paired_record());
    let pairing = paired_record().pairing.unwrap();
    h.connect();
    let sent = h.take_sent();
    let qv = tx::QuickVerifyRequest::decode(&sent[0][1..]).unwrap();

    h.deliver(&rx::QuickVerifyNegativeResponse { tmp_id: qv.tmp_id }.encode());
    let sent = h.take_sent();
    assert_eq!(sent[0][0], tx::FULL_VERIFY_REQUEST_1);
    assert_eq!(
        tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id,
        qv.tmp_id
    );
    assert_eq!(state(&h), SessionState::WaitFullVerify1TestUnpaired);

    let fvr1 = h.sim.full_verify_response_1(qv.tmp_id);
    h.deliver(&fvr1);
    let sent = h.take_sent();
    assert_eq!(sent[0][0], tx::TEST_IF_REALLY_UNPAIRED_REQUEST);
    let req = tx::TestIfReallyUnpairedRequest::decode(&sent[0][1..]).unwrap();
    let secret = h.sim.secret_for(&req.ecdh_public_key, &req.random);
    assert_eq!(req.pairing_id, pairing.id);
    assert_eq!(req.pairing_token, handshake::pairing_token(&secret, &pairing));
    assert_eq!(h.log.borrow().bonds, 0);

    h.deliver(
        &rx::TestIfReallyUnpairedResponse {
            result: handshake::not_found_tag(&secret, &req.pairing_token),
        }
        .encode(),
    );
    assert_eq!(h.button.record().pairing, None);
    assert!(h.button.is_unpaired());
    assert_eq!(h.log.borrow().revoked, 1);
    assert_eq!(h.recorder.count(|s| *s == Seen::Unpaired), 1);

    let key = h.button.record().key();
    h.button.forget(&mut h.store);
    assert!(h.store.get(&key).is_none());
    assert_eq!(h.button.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.recorder.seen().last(), Some(&Seen::Disconnect));
}

#[test]
fn credential_still_known_keeps_pairing() {
    let mut h = Harness::new(paired_record());
    h.connect();
    let sent = h.take_sent();
    let qv = tx::QuickVerifyRequest::decode(&sent[0][1..]).unwrap();
    h.deliver(&rx::QuickVerifyNegativeResponse { tmp_id: qv.tmp_id }.encode());
    h.take_sent();
    let fvr1 = h.sim.full_verify_response_1(qv.tmp_id);
    h.deliver(&fvr1);
    let sent = h.take_sent();
    let req = tx::TestIfReallyUnpairedRequest::decode(&sent[0][1..]).unwrap();
    let secret = h.sim.secret_for(&req.ecdh_public_key, &req.random);

    h.deliver(
        &rx::TestIfReallyUnpairedResponse {
            result: handshake::exists_tag(&secret, &req.pairing_token),
        }
        .encode(),
    );
    assert!(h.button.record().pairing.is_some());
    assert!(h.recorder.failures().is_empty());
    assert_eq!(h.log.borrow().revoked, 0);

    h.deliver(&rx::TestIfReallyUnpairedResponse { result: [0; 16] }.encode());
    assert!(h.button.record().pairing.is_some());
    assert_eq!(
        h.recorder.failures(),
        vec![Failure::GenuineCheckFailed(GenuineCheck::InvalidCalculatedSignature)]
    );
}

#[test]
fn too_many_apps_schedules_restart() {
    let mut h = Harness::new(unpaired_record());
    h.connect();
    let sent = h.take_sent();
    let tmp_id = tx::FullVerifyRequest1::decode(&sent[0][1..]).unwrap().tmp_id;

    h.deliver(
        &rx::NoLogicalConnectionSlots {
            tmp_ids: vec![tmp_id.wrapping_add(1)],
        }
        .encode(),
    );
    assert!(h.recorder.failures().is_empty());

    h.deliver(
        &rx::NoLogicalConnectionSlots {
            tmp_ids: vec![tmp_id.wrapping_add(1), tmp_id],
        }
        .encode(),
    );
    assert_eq!(h.recorder.failures(), vec![Failure::TooManyAppsConnected]);
    assert_eq!(h.log.borrow().restarts, vec![30_000]);
    assert_eq!(state(&h), SessionState::Failed);
}

#[test]
fn button_events_are_decoded_and_acked() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 8);

    h.deliver_signed(&rx::ButtonNotification {
        event_counter: 11,
        items: vec![
            rx::ButtonEventItem {
                timestamp: 32768,
                encoded: 1,
                was_queued: false,
                was_queued_last: false,
            },
            rx::ButtonEventItem {
                timestamp: 2 * 32768,
                encoded: 0b1010,
                was_queued: false,
                was_queued_last: false,
            },
        ],
    });

    assert_eq!(
        h.recorder.events(),
        vec![
            ButtonEvent::UpOrDown { up: false },
            ButtonEvent::UpOrDown { up: true },
            ButtonEvent::ClickOrHold { hold: false },
            ButtonEvent::SingleOrDoubleClickOrHold(ClickKind::Single),
            ButtonEvent::SingleOrDoubleClick { double: false },
        ]
    );
    let first_meta = h.recorder.seen().into_iter().find_map(|s| match s {
        Seen::Event(_, meta) => Some(meta),
        _ => None,
    });
    assert_eq!(first_meta.unwrap().timestamp_ms, 1000);

    let sent = h.take_signed();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, tx::ACK_BUTTON_EVENTS);
    assert_eq!(
        tx::AckButtonEvents::decode(&sent[0].1).unwrap().event_count,
        11
    );
    assert_eq!(h.button.record().event_count, 11);
    assert_eq!(h.button.press_count(), 6);
    let key = h.button.record().key();
    assert_eq!(h.store.get(&key).unwrap().event_count, 11);

    h.deliver_signed(&rx::PingRequest);
    assert_eq!(h.opcodes(), vec![tx::PING_RESPONSE]);
}

#[test]
fn pipeline_holds_third_request() {
    let mut record = paired_record();
    record.firmware_version = 6;
    let mut h = Harness::new(record);
    h.establish_quick();
    let ops = h.finish_init(1, 0);
    assert_eq!(
        ops,
        vec![
            tx::SET_ADV_PARAMETERS_REQUEST,
            tx::SET_NAME_REQUEST,
            tx::SET_CONNECTION_PARAMETERS_IND
        ]
    );

    h.deliver_signed(&rx::SetAdvParametersResponse);
    assert_eq!(h.opcodes(), vec![tx::GET_BATTERY_LEVEL_REQUEST]);
    assert!(h.button.record().adv_settings_configured);
}

#[test]
fn unsolicited_response_widens_pipeline() {
    let mut record = paired_record();
    record.firmware_version = 6;
    let mut h = Harness::new(record);
    h.establish_quick();
    h.take_signed();

    // Counted against the init request, which is then answered too.
    h.deliver_signed(&rx::SetAdvParametersResponse);
    h.deliver_signed(&rx::InitButtonEventsResponse {
        has_queued_events: false,
        timestamp: 0,
        event_count: 0,
        boot_id: 1,
    });
    assert_eq!(
        h.opcodes(),
        vec![
            tx::SET_ADV_PARAMETERS_REQUEST,
            tx::SET_NAME_REQUEST,
            tx::SET_CONNECTION_PARAMETERS_IND,
            tx::GET_BATTERY_LEVEL_REQUEST
        ]
    );
}

#[test]
fn local_name_is_resent_after_pending_request() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);

    h.button.set_name(&mut h.store, "kitchen", 1234);
    assert!(h.take_sent().is_empty());
    assert_eq!(h.button.name(), "kitchen");

    h.deliver_signed(&rx::NameResponse {
        timestamp_utc_ms: 0,
        name: "desk".to_string(),
    });
    let sent = h.take_signed();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, tx::SET_NAME_REQUEST);
    let req = tx::SetNameRequest::decode(&sent[0].1).unwrap();
    assert!(req.force);
    assert_eq!(req.name, "kitchen");
    assert_eq!(req.timestamp_utc_ms, 1234);
    assert_eq!(h.button.name(), "kitchen");

    h.deliver_signed(&rx::NameUpdatedNotification {
        name: "lobby".to_string(),
    });
    assert_eq!(h.button.name(), "lobby");
    assert_eq!(h.button.record().name_timestamp_utc_ms, 0);
    assert!(h.recorder.seen().contains(&Seen::Name("lobby".to_string())));
    let key = h.button.record().key();
    assert_eq!(h.store.get(&key).unwrap().name, "lobby");
}

#[test]
fn differing_name_from_button_is_adopted() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);

    h.deliver_signed(&rx::NameResponse {
        timestamp_utc_ms: 99,
        name: "garage".to_string(),
    });
    assert_eq!(h.button.name(), "garage");
    assert_eq!(h.recorder.count(|s| matches!(s, Seen::Name(_))), 1);
    assert!(h.take_sent().is_empty());
}

#[test]
fn firmware_update_runs_to_completion() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);
    h.deliver_signed(&rx::NameResponse {
        timestamp_utc_ms: 0,
        name: "desk".to_string(),
    });
    h.deliver_signed(&rx::GetBatteryLevelResponse { level: 800 });
    assert!(h.take_sent().is_empty());

    h.log.borrow_mut().now = 1_000_000;
    h.button.on_timer(&mut h.store, Timer::FirmwareCheck);
    assert_eq!(h.opcodes(), vec![tx::GET_FIRMWARE_VERSION_REQUEST]);

    h.deliver_signed(&rx::GetFirmwareVersionResponse { version: 10 });
    assert_eq!(h.log.borrow().fetches, vec![("ab".repeat(16), 10)]);
    assert!(h.recorder.seen().contains(&Seen::Firmware(10)));
    assert_eq!(h.button.firmware_version(), 10);

    let mut image = vec![0x77; 8];
    image.extend((0..1000).map(|i| i as u8));
    h.button.on_firmware_checked(
        &mut h.store,
        FirmwareCheck {
            image: Some(image),
            retry_minutes: 20,
        },
    );
    let sent = h.take_signed();
    assert_eq!(sent[0].0, tx::START_FIRMWARE_UPDATE_REQUEST);
    let start = tx::StartFirmwareUpdateRequest::decode(&sent[0].1).unwrap();
    assert_eq!(start.len, 250);
    assert_eq!(start.iv, [0x77; 8]);

    h.deliver_signed(&rx::StartFirmwareUpdateResponse { start_pos: 0 });
    let chunks = h.take_signed();
    assert_eq!(chunks.len(), 9);
    assert!(chunks.iter().all(|(op, _)| *op == tx::FIRMWARE_UPDATE_DATA_IND));
    assert_eq!(chunks.iter().map(|(_, b)| b.len()).sum::<usize>(), 1000);

    h.deliver_signed(&rx::FirmwareUpdateNotification { pos: 250 });
    assert_eq!(h.opcodes(), vec![tx::FORCE_BT_DISCONNECT_IND]);
    assert_eq!(h.button.record().next_firmware_check_utc_ms, 1_060_000);
}

#[test]
fn no_firmware_update_reschedules_check() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);
    h.deliver_signed(&rx::NameResponse {
        timestamp_utc_ms: 0,
        name: "desk".to_string(),
    });
    h.deliver_signed(&rx::GetBatteryLevelResponse { level: 800 });

    h.log.borrow_mut().now = 5_000;
    h.button.on_timer(&mut h.store, Timer::FirmwareCheck);
    h.take_signed();
    h.deliver_signed(&rx::GetFirmwareVersionResponse { version: 0 });
    assert!(!h.recorder.seen().iter().any(|s| matches!(s, Seen::Firmware(_))));

    h.button.on_firmware_checked(
        &mut h.store,
        FirmwareCheck {
            image: None,
            retry_minutes: 1440,
        },
    );
    let day = 1440 * 60 * 1000;
    assert_eq!(h.button.record().next_firmware_check_utc_ms, 5_000 + day);
    assert_eq!(h.log.borrow().timers.get(&Timer::FirmwareCheck), Some(&day));
    assert!(h.take_sent().is_empty());
}

#[test]
fn auto_disconnect_time_is_clamped_and_sent() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);

    h.button.set_auto_disconnect_time(10);
    assert_eq!(h.button.record().auto_disconnect_time, 40);
    let sent = h.take_signed();
    assert_eq!(sent[0].0, tx::SET_AUTO_DISCONNECT_TIME_IND);
    assert_eq!(
        tx::SetAutoDisconnectTimeInd::decode(&sent[0].1)
            .unwrap()
            .auto_disconnect_time,
        40
    );
}

#[test]
fn disconnect_ends_session_and_cancels_timers() {
    let mut h = Harness::new(paired_record());
    h.establish_quick();
    h.finish_init(1, 0);
    assert!(!h.log.borrow().timers.is_empty());

    let ended = h.button.on_disconnected().unwrap();
    assert_eq!(ended.state(), SessionState::Ended);
    let log = h.log.borrow();
    assert!(log.timers.is_empty());
    assert!(log.cancelled.contains(&Timer::FirmwareCheck));
    assert!(log.cancelled.contains(&Timer::BatteryPoll));
    drop(log);
    assert_eq!(h.recorder.seen().last(), Some(&Seen::Disconnect));
    assert_eq!(h.button.connection_state(), ConnectionState::Connecting);

    // No session left to take the data.
    h.deliver_signed(&rx::PingRequest);
    assert!(h.take_sent().is_empty());
}
