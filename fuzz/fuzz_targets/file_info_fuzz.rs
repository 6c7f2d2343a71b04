#![no_main]
use arbitrary::Arbitrary;
use fusebridge::{FileHandleState, FileInfo, FileInfoFlags};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Fields {
    flags: i32,
    packed: u32,
    fh: u64,
    lock_owner: u64,
    poll_events: u32,
    backing_id: i32,
    compat_flags: u64,
}

fuzz_target!(|fields: Fields| {
    let info = FileInfo {
        flags: fields.flags,
        packed: FileInfoFlags::from_bits_truncate(fields.packed),
        fh: fields.fh,
        lock_owner: fields.lock_owner,
        poll_events: fields.poll_events,
        backing_id: fields.backing_id,
        compat_flags: fields.compat_flags,
    };
    // Bits above the nine flags never survive the trip.
    assert_eq!(info.packed.bits(), fields.packed & FileInfoFlags::ALL.bits());

    let Some(state) = FileHandleState::encode(&info) else {
        return;
    };
    assert_eq!(state.decode(), info);
    assert_eq!(FileInfo::decode(&info.to_native()), info);

    // Through the raw pointer form handed across the C boundary.
    let raw = state.into_raw();
    let state = unsafe { FileHandleState::from_raw(raw) }.expect("non-null");
    assert_eq!(state.decode(), info);
});
