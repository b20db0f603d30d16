use std::cell::UnsafeCell;
use std::fmt::Debug;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU8, Ordering};

/// Command kinds understood by the host drain agent.
///
/// The discriminants are part of the wire contract with the host and must
/// not be reordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    #[default]
    Put = 0,
    PutInline = 1,
    Get = 2,
    PutNbi = 3,
    GetNbi = 4,
    Fence = 5,
    Quiet = 6,
    Finalize = 7,
    ToAll = 8,
    BarrierAll = 9,
}

impl Command {
    /// Whether the issuing thread waits on its completion byte after posting.
    ///
    /// The host uses the same rule to decide which commands it must
    /// acknowledge through the status array.
    #[inline(always)]
    pub const fn is_blocking(self) -> bool {
        !matches!(self, Self::PutNbi | Self::GetNbi | Self::PutInline)
    }
}

/// Element datatype of a collective reduction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    Float = 0,
    Double = 1,
    #[default]
    Int = 2,
    Long = 3,
    LongLong = 4,
    Short = 5,
    LongDouble = 6,
}

/// Reduction operator of a collective reduction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReduceOp {
    #[default]
    Sum = 0,
    Min = 1,
    Max = 2,
    Prod = 3,
    And = 4,
    Or = 5,
    Xor = 6,
}

/// Fields of a queue element that the producer packs before publishing.
///
/// Layout is fixed (`repr(C)`) since the host reads it directly. The
/// collective fields are only meaningful for [`Command::ToAll`] and are zero
/// otherwise. For [`Command::PutInline`] the value bytes are stored in `src`
/// instead of an address.
///
/// The all-zero bit pattern is valid, which lets rings live in zero-filled
/// shared memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Body {
    pub kind: Command,
    pub pe: u32,
    pub size: u64,
    pub src: u64,
    pub dst: u64,
    pub thread_id: u32,
    pub log_pe_stride: u32,
    pub pe_size: u32,
    pub op: ReduceOp,
    pub work: u64,
    pub sync: u64,
    pub datatype: DataType,
    _reserved: u32,
}

impl Body {
    /// Body of a non-collective command.
    #[inline(always)]
    pub(crate) fn new(kind: Command, pe: u32, size: u64, src: u64, dst: u64, thread_id: u32) -> Self {
        Self {
            kind,
            pe,
            size,
            src,
            dst,
            thread_id,
            ..Self::default()
        }
    }
}

/// One slot of the command ring.
///
/// ```text
/// [ valid (1 byte) | padding (63 bytes) ][ body (72 bytes) | tail padding ]
///   cache line 0                           cache lines 1..=2
/// ```
///
/// `valid` sits alone on its cache line so the host polling it does not
/// contend with the producer filling in the body. The producer writes the
/// body, fences, and only then sets `valid`; a consumer that observes
/// `valid == 1` with acquire ordering therefore sees the whole body.
#[repr(C, align(64))]
pub struct QueueElement {
    valid: AtomicU8,
    _padding: [u8; 63],
    body: UnsafeCell<Body>,
}

pub const ELEMENT_SIZE: usize = 192;

const _: () = assert!(size_of::<QueueElement>() == ELEMENT_SIZE);
const _: () = assert!(offset_of!(QueueElement, body) == 64);
const _: () = assert!(size_of::<Body>() == 72);

// Body is only written by the producer that claimed the slot while `valid`
// is clear, and only read by the consumer after observing `valid` set.
unsafe impl Sync for QueueElement {}
unsafe impl Send for QueueElement {}

impl Default for QueueElement {
    fn default() -> Self {
        Self {
            valid: AtomicU8::new(0),
            _padding: [0; 63],
            body: UnsafeCell::new(Body::default()),
        }
    }
}

impl QueueElement {
    /// Returns `true` once the producer has published this slot.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) != 0
    }

    /// Writes every field except `valid`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: it was claimed through the write index
    /// and the consumer has released it (its `valid` flag is clear).
    #[inline(always)]
    pub(crate) unsafe fn pack(&self, body: Body) {
        unsafe { self.body.get().write_volatile(body) }
    }

    /// Sets `valid`, handing the slot to the consumer.
    #[inline(always)]
    pub(crate) fn publish(&self) {
        self.valid.store(1, Ordering::Release);
    }

    /// Copies the body out of a published slot.
    ///
    /// # Safety
    ///
    /// The caller must have observed [`QueueElement::is_valid`] returning
    /// `true` and must not have cleared the slot yet.
    #[inline(always)]
    pub(crate) unsafe fn read(&self) -> Body {
        unsafe { self.body.get().read_volatile() }
    }

    /// Clears `valid`, returning the slot to the producers.
    #[inline(always)]
    pub(crate) fn clear(&self) {
        self.valid.store(0, Ordering::Release);
    }
}

impl Debug for QueueElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueElement")
            .field("valid", &self.valid.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Values small enough to travel inside a queue element.
///
/// The value's native-endian bytes occupy the low-addressed bytes of the
/// element's `src` field, the remainder is zero.
pub trait InlineValue: Copy + sealed::Sealed {
    const SIZE: usize;

    fn to_inline(self) -> u64;

    fn from_inline(bits: u64) -> Self;
}

macro_rules! inline_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl InlineValue for $t {
                const SIZE: usize = size_of::<$t>();

                #[inline(always)]
                fn to_inline(self) -> u64 {
                    let mut bytes = [0u8; 8];
                    bytes[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
                    u64::from_ne_bytes(bytes)
                }

                #[inline(always)]
                fn from_inline(bits: u64) -> Self {
                    let bytes = bits.to_ne_bytes();
                    let mut value = [0u8; size_of::<$t>()];
                    value.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_ne_bytes(value)
                }
            }
        )*
    };
}

inline_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_element_is_empty_put() {
        let element = QueueElement::default();
        assert!(!element.is_valid());
        let body = unsafe { element.read() };
        assert_eq!(body.kind, Command::Put);
        assert_eq!(body, Body::default());
    }

    #[test]
    fn element_is_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<QueueElement>(), 64);
        let ring: Vec<QueueElement> = (0..4).map(|_| QueueElement::default()).collect();
        for element in &ring {
            assert_eq!(element as *const _ as usize % 64, 0);
        }
    }

    #[test]
    fn pack_publish_read_clear() {
        let element = QueueElement::default();
        let body = Body::new(Command::GetNbi, 3, 4096, 0x1000, 0x2000, 7);

        unsafe { element.pack(body) };
        assert!(!element.is_valid(), "pack must not publish");

        element.publish();
        assert!(element.is_valid());
        assert_eq!(unsafe { element.read() }, body);

        element.clear();
        assert!(!element.is_valid());
    }

    #[test]
    fn blocking_classification() {
        let blocking = [
            Command::Put,
            Command::Get,
            Command::Fence,
            Command::Quiet,
            Command::Finalize,
            Command::ToAll,
            Command::BarrierAll,
        ];
        let non_blocking = [Command::PutNbi, Command::GetNbi, Command::PutInline];

        assert!(blocking.iter().all(|c| c.is_blocking()));
        assert!(non_blocking.iter().all(|c| !c.is_blocking()));
    }

    #[test]
    fn inline_values_occupy_leading_bytes() {
        let bits = 0xABu8.to_inline();
        assert_eq!(bits.to_ne_bytes()[0], 0xAB);
        assert!(bits.to_ne_bytes()[1..].iter().all(|&b| b == 0));

        assert_eq!(i16::from_inline((-2i16).to_inline()), -2);
        assert_eq!(u32::from_inline(0xDEAD_BEEFu32.to_inline()), 0xDEAD_BEEF);
        assert_eq!(f64::from_inline(1.5f64.to_inline()), 1.5);
        assert_eq!(f32::SIZE, 4);
    }
}
