#![no_main]
use fusebridge::{BufDescriptor, BufferVector};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|segments: Vec<Vec<u8>>| {
    let Some(mut vec) = BufferVector::create(segments.len()) else {
        assert!(segments.is_empty());
        return;
    };
    assert_eq!(vec.len(), segments.len());
    for (index, segment) in segments.iter().enumerate() {
        vec.set(index, BufDescriptor::Memory(segment));
    }

    let expected: usize = segments.iter().map(Vec::len).sum();
    assert_eq!(vec.total_size(), expected);
    for (index, segment) in segments.iter().enumerate() {
        let buf = vec.get(index).expect("slot within count");
        assert_eq!(buf.size, segment.len());
        assert_eq!(buf.fd, -1);
    }
    assert!(vec.get(segments.len()).is_none());
});
