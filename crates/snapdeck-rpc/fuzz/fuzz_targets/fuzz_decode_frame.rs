#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever yield a frame, "incomplete", or an error
    let _ = snapdeck_rpc::decode_frame(data);
});
