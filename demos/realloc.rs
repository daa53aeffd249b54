use segalloc::SegAlloc;

fn main() {
    let mut alloc = SegAlloc::new();

    unsafe {
        let p = alloc.allocate(40);
        println!("Allocated 40 bytes at {p:?}");

        for i in 0..40 {
            p.add(i).write(i as u8);
        }

        let q = alloc.reallocate(p, 400);
        println!("Reallocated to 400 bytes at {q:?}");

        // The original 40 bytes moved along with the block.
        for i in 0..40 {
            assert_eq!(q.add(i).read(), i as u8);
        }
        println!("First 40 bytes survived the move");

        let gone = alloc.reallocate(q, 0);
        assert!(gone.is_null());
        println!("Reallocating to 0 bytes freed the block");
    }
}
