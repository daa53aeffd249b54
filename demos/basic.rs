use segalloc::SegAlloc;

fn log_alloc(what: &str, addr: *mut u8, size: usize) {
    println!("Requested {size} bytes for {what}");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut alloc = SegAlloc::new();

    unsafe {
        let a = alloc.allocate(24);
        log_alloc("a", a, 24);

        let b = alloc.allocate(8);
        log_alloc("b (mini block)", b, 8);

        let c = alloc.zero_alloc(16, 8);
        log_alloc("c (zeroed)", c, 16 * 8);

        // Write through the pointers to show the payloads are disjoint.
        std::ptr::write_bytes(a, 0x11, 24);
        std::ptr::write_bytes(b, 0x22, 8);
        assert_eq!(c.read(), 0);

        alloc.free(a);
        alloc.free(b);
        alloc.free(c);

        // a and b were adjacent; after both frees the space coalesced and
        // a larger request fits where the small ones were.
        let d = alloc.allocate(32);
        log_alloc("d (reusing freed space)", d, 32);
        alloc.free(d);
    }
}
