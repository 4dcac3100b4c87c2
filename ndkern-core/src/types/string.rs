//! `fixed_string[N, 'enc']` and the conversions in and out of it.

use core::fmt;
use core::marker::PhantomData;

use super::{BaseType, BuiltinScalar, DType, Kind, Scalar, TypeFlags, TypeId, same_as};
use crate::arrmeta::MetaSlot;
use crate::assign::ErrorMode;
use crate::error::RangeReason;
use crate::kernel::{Children, KernelBuilder, KernelFrame, KernelRequest};
use crate::{Error, Result};

/// Character encoding of a fixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Ascii,
    Utf8,
    Utf16,
    Utf32,
}

impl Encoding {
    /// Bytes per code unit.
    pub fn unit_size(self) -> usize {
        match self {
            Encoding::Ascii | Encoding::Utf8 => 1,
            Encoding::Utf16 => 2,
            Encoding::Utf32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Ascii => "ascii",
            Encoding::Utf8 => "utf8",
            Encoding::Utf16 => "utf16",
            Encoding::Utf32 => "utf32",
        }
    }

    pub fn from_name(name: &str) -> Option<Encoding> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "ascii" => Some(Encoding::Ascii),
            "utf8" => Some(Encoding::Utf8),
            "utf16" => Some(Encoding::Utf16),
            "utf32" => Some(Encoding::Utf32),
            _ => None,
        }
    }

    /// Decodes a zero padded buffer. With `lossy`, invalid data becomes U+FFFD instead of `None`.
    pub fn decode(self, bytes: &[u8], lossy: bool) -> Option<String> {
        match self {
            Encoding::Ascii | Encoding::Utf8 => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let bytes = &bytes[..end];
                if self == Encoding::Ascii && !bytes.is_ascii() && !lossy {
                    return None;
                }
                match core::str::from_utf8(bytes) {
                    Ok(s) => Some(s.to_string()),
                    Err(_) if lossy => Some(String::from_utf8_lossy(bytes).into_owned()),
                    Err(_) => None,
                }
            }
            Encoding::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                if lossy {
                    Some(String::from_utf16_lossy(&units))
                } else {
                    String::from_utf16(&units).ok()
                }
            }
            Encoding::Utf32 => bytes
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .take_while(|&u| u != 0)
                .map(|u| char::from_u32(u).or(lossy.then_some(char::REPLACEMENT_CHARACTER)))
                .collect(),
        }
    }

    /// Encodes `text` into `out` (whose length is a whole number of units), zero padding the rest.
    ///
    /// Under `ErrorMode::None` overlong text is truncated at a character boundary and
    /// unencodable characters become `?`; stricter modes reject both.
    pub fn encode(self, text: &str, out: &mut [u8], mode: ErrorMode) -> core::result::Result<(), RangeReason> {
        out.fill(0);
        let strict = mode >= ErrorMode::Overflow;
        let mut pos = 0;
        let mut unit_buf = [0u16; 2];
        for ch in text.chars() {
            let ch = if self == Encoding::Ascii && !ch.is_ascii() {
                if strict {
                    return Err(RangeReason::Unencodable);
                }
                '?'
            } else {
                ch
            };
            let need = match self {
                Encoding::Ascii | Encoding::Utf8 => ch.len_utf8(),
                Encoding::Utf16 => ch.len_utf16() * 2,
                Encoding::Utf32 => 4,
            };
            if pos + need > out.len() {
                if strict {
                    return Err(RangeReason::Truncated);
                }
                break;
            }
            match self {
                Encoding::Ascii | Encoding::Utf8 => {
                    ch.encode_utf8(&mut out[pos..pos + need]);
                }
                Encoding::Utf16 => {
                    for (i, u) in ch.encode_utf16(&mut unit_buf).iter().enumerate() {
                        out[pos + 2 * i..pos + 2 * i + 2].copy_from_slice(&u.to_ne_bytes());
                    }
                }
                Encoding::Utf32 => out[pos..pos + 4].copy_from_slice(&(ch as u32).to_ne_bytes()),
            }
            pos += need;
        }
        Ok(())
    }
}

/// `fixed_string[N, 'enc']`: `N` code units, zero padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedString {
    len: usize,
    encoding: Encoding,
}

impl FixedString {
    pub fn new(len: usize, encoding: Encoding) -> Self {
        Self { len, encoding }
    }

    pub fn make(len: usize, encoding: Encoding) -> DType {
        DType::new(Self::new(len, encoding))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decodes the element at `data`.
    ///
    /// # Safety
    ///
    /// `data` must point to `data_size()` readable bytes.
    pub unsafe fn read(&self, data: *const u8, lossy: bool) -> Option<String> {
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { core::slice::from_raw_parts(data, self.data_size()) };
        self.encoding.decode(bytes, lossy)
    }

    /// Encodes `text` into the element at `data`.
    ///
    /// # Safety
    ///
    /// `data` must point to `data_size()` writable bytes.
    pub unsafe fn write(
        &self,
        data: *mut u8,
        text: &str,
        mode: ErrorMode,
    ) -> core::result::Result<(), RangeReason> {
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { core::slice::from_raw_parts_mut(data, self.data_size()) };
        self.encoding.encode(text, bytes, mode)
    }
}

impl BaseType for FixedString {
    fn id(&self) -> TypeId {
        TypeId::FixedString
    }

    fn kind(&self) -> Kind {
        Kind::String
    }

    fn data_size(&self) -> usize {
        self.len * self.encoding.unit_size()
    }

    fn data_alignment(&self) -> usize {
        self.encoding.unit_size()
    }

    fn flags(&self) -> TypeFlags {
        TypeFlags::NONE
    }

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixed_string[{}, '{}']", self.len, self.encoding.name())
    }

    fn eq_type(&self, other: &dyn BaseType) -> bool {
        same_as::<Self>(other).is_some_and(|o| o == self)
    }

    unsafe fn print_data(
        &self,
        out: &mut dyn fmt::Write,
        _meta: &[MetaSlot],
        data: *const u8,
    ) -> fmt::Result {
        // SAFETY: forwarded from the caller.
        let text = unsafe { self.read(data, true) }.unwrap_or_default();
        write!(out, "{text:?}")
    }

    fn is_lossless_assignment(&self, dst: &DType, src: &DType) -> bool {
        let (Some(d), Some(s)) = (dst.downcast::<FixedString>(), src.downcast::<FixedString>()) else {
            return false;
        };
        match (d.encoding, s.encoding) {
            (a, b) if a == b => d.len >= s.len,
            (_, Encoding::Ascii) => d.len >= s.len,
            (Encoding::Utf32, _) => d.len >= s.len,
            _ => false,
        }
    }

    fn make_assignment_kernel(
        &self,
        ckb: &mut KernelBuilder,
        dst: &DType,
        _dst_meta: &[MetaSlot],
        src: &DType,
        _src_meta: &[MetaSlot],
        kernreq: KernelRequest,
        errmode: ErrorMode,
    ) -> Result<Option<usize>> {
        let (Some(d), Some(s)) = (dst.downcast::<FixedString>(), src.downcast::<FixedString>()) else {
            return Ok(None);
        };
        let frame = StringAssign {
            dst: d.clone(),
            src: s.clone(),
            dst_tp: dst.clone(),
            src_tp: src.clone(),
            mode: errmode,
        };
        Ok(Some(ckb.emplace(frame, kernreq)))
    }
}

fn encode_error(text: String, src: &DType, dst: &DType, mode: ErrorMode, reason: RangeReason) -> Error {
    Error::ConversionRange {
        value: format!("{text:?}"),
        src: src.clone(),
        dst: dst.clone(),
        mode,
        reason,
    }
}

/// Re-encodes one fixed string into another.
struct StringAssign {
    dst: FixedString,
    src: FixedString,
    dst_tp: DType,
    src_tp: DType,
    mode: ErrorMode,
}

impl KernelFrame for StringAssign {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let lossy = self.mode == ErrorMode::None;
        // SAFETY: the caller passes elements of the two string types.
        let text = unsafe { self.src.read(src[0], lossy) }.ok_or_else(|| Error::InvalidValue {
            value: unsafe { self.src.read(src[0], true) }.unwrap_or_default(),
            dst: self.dst_tp.clone(),
        })?;
        // SAFETY: as above.
        unsafe { self.dst.write(dst, &text, self.mode) }
            .map_err(|reason| encode_error(text, &self.src_tp, &self.dst_tp, self.mode, reason))
    }
}

/// Formats a builtin `S` into a fixed string.
struct NumericToString<S> {
    dst: FixedString,
    dst_tp: DType,
    mode: ErrorMode,
    _marker: PhantomData<fn(S)>,
}

impl<S: BuiltinScalar> KernelFrame for NumericToString<S> {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes an aligned `S`.
        let v = unsafe { core::ptr::read(src[0].cast::<S>()) };
        let mut text = String::new();
        let _ = v.fmt_value(&mut text);
        // SAFETY: the caller passes a string element.
        unsafe { self.dst.write(dst, &text, self.mode) }
            .map_err(|reason| encode_error(text, &DType::of::<S>(), &self.dst_tp, self.mode, reason))
    }
}

/// Parses a fixed string into a builtin `D`.
struct StringToNumeric<D> {
    src: FixedString,
    src_tp: DType,
    mode: ErrorMode,
    _marker: PhantomData<fn() -> D>,
}

impl<D: BuiltinScalar> KernelFrame for StringToNumeric<D> {
    unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        // SAFETY: the caller passes a string element.
        let text = unsafe { self.src.read(src[0], true) }.unwrap_or_default();
        let invalid = || Error::InvalidValue {
            value: text.clone(),
            dst: DType::of::<D>(),
        };
        let v = Scalar::parse(&text).ok_or_else(invalid)?;
        let out = D::from_scalar(v, self.mode)
            .map_err(|reason| encode_error(text.clone(), &self.src_tp, &DType::of::<D>(), self.mode, reason))?;
        // SAFETY: the caller passes an aligned `D`.
        unsafe { core::ptr::write(dst.cast::<D>(), out) };
        Ok(())
    }
}

fn no_conversion(dst: &DType, src: &DType) -> Error {
    Error::NoConversion {
        dst: dst.clone(),
        src: src.clone(),
    }
}

/// Kind converter: builtin numeric → fixed string.
pub(crate) fn make_numeric_to_string(
    ckb: &mut KernelBuilder,
    dst: &DType,
    _dst_meta: &[MetaSlot],
    src: &DType,
    _src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<usize> {
    let d = dst
        .downcast::<FixedString>()
        .ok_or_else(|| no_conversion(dst, src))?;
    let DType::Builtin(id) = src else {
        return Err(no_conversion(dst, src));
    };
    crate::with_builtin_type!(*id, S => {
        Ok(ckb.emplace(
            NumericToString::<S> {
                dst: d.clone(),
                dst_tp: dst.clone(),
                mode: errmode,
                _marker: PhantomData,
            },
            kernreq,
        ))
    }, _ => Err(no_conversion(dst, src)))
}

/// Kind converter: fixed string → builtin numeric.
pub(crate) fn make_string_to_numeric(
    ckb: &mut KernelBuilder,
    dst: &DType,
    _dst_meta: &[MetaSlot],
    src: &DType,
    _src_meta: &[MetaSlot],
    kernreq: KernelRequest,
    errmode: ErrorMode,
) -> Result<usize> {
    let s = src
        .downcast::<FixedString>()
        .ok_or_else(|| no_conversion(dst, src))?;
    let DType::Builtin(id) = dst else {
        return Err(no_conversion(dst, src));
    };
    crate::with_builtin_type!(*id, D => {
        Ok(ckb.emplace(
            StringToNumeric::<D> {
                src: s.clone(),
                src_tp: src.clone(),
                mode: errmode,
                _marker: PhantomData,
            },
            kernreq,
        ))
    }, _ => Err(no_conversion(dst, src)))
}
