// Byte layout tests for speedy-serialized wire types.
//
// Usage:
//   serialization_test!( type = SequenceNumber,
//     { name, value, le = [..], be = [..] }, ... );
macro_rules! serialization_test {
  (type = $type:ty, $({ $name:ident, $original:expr, le = $le:expr, be = $be:expr }),+ $(,)?) => {
    $(mod $name {
      #[allow(unused_imports)]
      use super::*;
      use speedy::{Endianness, Readable, Writable};

      #[test]
      fn serialize_deserialize_little_endian() {
        let original: $type = $original;
        let encoded = original
          .write_to_vec_with_ctx(Endianness::LittleEndian)
          .unwrap();
        let expected: Vec<u8> = $le.to_vec();
        assert_eq!(expected, encoded, "little endian layout mismatch");
        let decoded =
          <$type>::read_from_buffer_with_ctx(Endianness::LittleEndian, &encoded).unwrap();
        assert_eq!(original, decoded);
      }

      #[test]
      fn serialize_deserialize_big_endian() {
        let original: $type = $original;
        let encoded = original
          .write_to_vec_with_ctx(Endianness::BigEndian)
          .unwrap();
        let expected: Vec<u8> = $be.to_vec();
        assert_eq!(expected, encoded, "big endian layout mismatch");
        let decoded =
          <$type>::read_from_buffer_with_ctx(Endianness::BigEndian, &encoded).unwrap();
        assert_eq!(original, decoded);
      }
    })+
  };
}
