#![no_main]

use bloomcraft_client::protocol::{PlantKind, PlayerId, RoomDocument};
use bloomcraft_client::reconciler::{Reconciler, Role};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Parsing must reject or accept, never panic.
    let _ = RoomDocument::from_value(value.clone());

    // Neither role may panic on arbitrary snapshots, repeated.
    for role in [Role::Host, Role::Joiner] {
        let mut reconciler = Reconciler::new(PlayerId::new("p_fuzz0001_0"), role, PlantKind::Lotus);
        for now in [0, u64::MAX] {
            let _ = reconciler.apply_value(value.clone(), now);
        }
    }
});
