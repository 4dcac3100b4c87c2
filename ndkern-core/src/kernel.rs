//! Kernels: trees of frames built at runtime for one concrete operation.
//!
//! A [`KernelBuilder`] collects frames in a flat list. A frame that needs children records their
//! position *relative to itself*; children are always placed after their parent, so at call time a
//! parent is handed the tail of the list as [`Children`] and reaches a child by that relative index.
//!
//! Lifecycle: `KernelBuilder::new` → `emplace`* → `finalize` → [`Kernel`] → drop. Dropping either a
//! builder or a kernel destroys the frames in construction order.

use core::any::Any;
use core::fmt;
use core::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::{Error, Result};

/// Most source operands a frame may take.
pub const MAX_ARGS: usize = 8;

static LIVE_FRAMES: AtomicUsize = AtomicUsize::new(0);

/// Number of frames currently alive in the process, across all builders and kernels.
pub fn live_frames() -> usize {
    LIVE_FRAMES.load(Ordering::SeqCst)
}

/// Which entry point the caller of a frame will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelRequest {
    /// One element per call.
    Single,
    /// `count` elements per call with arbitrary strides.
    Strided,
    /// Strided calls whose strides equal the element sizes.
    Contiguous,
}

impl KernelRequest {
    pub fn is_strided(self) -> bool {
        !matches!(self, KernelRequest::Single)
    }
}

/// One node of a kernel.
///
/// `dst` and `src` point at element data; the frame owns whatever state it captured when it was
/// built and reaches its children through `children`.
pub trait KernelFrame: Any + Send {
    /// Processes one element.
    ///
    /// # Safety
    ///
    /// `dst` and every pointer in `src` must point to valid, suitably aligned elements of the
    /// types the frame was built for.
    unsafe fn single(
        &mut self,
        children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()>;

    /// Processes `count` elements, advancing each pointer by its stride.
    ///
    /// # Safety
    ///
    /// Every element addressed by the pointers and strides must satisfy the conditions of
    /// [`KernelFrame::single`].
    unsafe fn strided(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let n = src.len();
        assert!(n <= MAX_ARGS, "a frame takes at most {MAX_ARGS} sources");
        let mut ptrs = [ptr::null::<u8>(); MAX_ARGS];
        ptrs[..n].copy_from_slice(src);
        let mut dst = dst;
        for _ in 0..count {
            // SAFETY: forwarded from the caller.
            unsafe { self.single(children.reborrow(), dst, &ptrs[..n])? };
            dst = dst.wrapping_offset(dst_stride);
            for (p, &s) in ptrs[..n].iter_mut().zip(src_stride) {
                *p = p.wrapping_offset(s);
            }
        }
        Ok(())
    }

    /// Short name used in kernel dumps: the type name without its path or generic arguments.
    fn name(&self) -> &'static str {
        let full = core::any::type_name::<Self>();
        let head = full.split('<').next().unwrap_or(full);
        &head[head.rfind("::").map_or(0, |i| i + 2)..]
    }
}

struct FrameSlot {
    frame: Box<dyn KernelFrame>,
    request: KernelRequest,
}

impl FrameSlot {
    fn new(frame: Box<dyn KernelFrame>, request: KernelRequest) -> Self {
        LIVE_FRAMES.fetch_add(1, Ordering::SeqCst);
        Self { frame, request }
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        LIVE_FRAMES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The frames placed after the running frame.
pub struct Children<'a> {
    frames: &'a mut [FrameSlot],
}

impl Children<'_> {
    pub fn reborrow(&mut self) -> Children<'_> {
        Children {
            frames: &mut *self.frames,
        }
    }

    fn child(&mut self, rel: usize) -> (&mut FrameSlot, Children<'_>) {
        assert!(
            rel >= 1 && rel <= self.frames.len(),
            "child offset {rel} outside of the kernel"
        );
        let (slot, rest) = self.frames[rel - 1..]
            .split_first_mut()
            .unwrap_or_else(|| unreachable!());
        (slot, Children { frames: rest })
    }

    /// Invokes the child `rel` frames after the running one on one element.
    ///
    /// # Safety
    ///
    /// As [`KernelFrame::single`] for the child.
    ///
    /// # Panics
    ///
    /// Panics if the child was requested as strided.
    pub unsafe fn single(&mut self, rel: usize, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let (slot, children) = self.child(rel);
        assert!(
            slot.request == KernelRequest::Single,
            "frame {} was built for {:?} calls",
            slot.frame.name(),
            slot.request
        );
        // SAFETY: forwarded from the caller.
        unsafe { slot.frame.single(children, dst, src) }
    }

    /// Invokes the child `rel` frames after the running one on a strided run.
    ///
    /// # Safety
    ///
    /// As [`KernelFrame::strided`] for the child.
    ///
    /// # Panics
    ///
    /// Panics if the child was requested as single.
    pub unsafe fn strided(
        &mut self,
        rel: usize,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let (slot, children) = self.child(rel);
        assert!(
            slot.request.is_strided(),
            "frame {} was built for single calls",
            slot.frame.name()
        );
        // SAFETY: forwarded from the caller.
        unsafe {
            slot.frame
                .strided(children, dst, dst_stride, src, src_stride, count)
        }
    }
}

/// Accumulates frames; the only way to obtain a [`Kernel`].
#[derive(Default)]
pub struct KernelBuilder {
    frames: Vec<FrameSlot>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Appends a frame and returns its offset.
    pub fn emplace<F: KernelFrame>(&mut self, frame: F, kernreq: KernelRequest) -> usize {
        let offset = self.frames.len();
        self.frames.push(FrameSlot::new(Box::new(frame), kernreq));
        offset
    }

    /// Typed access to an already placed frame, e.g. to record a child offset.
    ///
    /// # Panics
    ///
    /// Panics if no frame of type `F` sits at `offset`.
    pub fn frame_mut<F: KernelFrame>(&mut self, offset: usize) -> &mut F {
        let slot = self
            .frames
            .get_mut(offset)
            .unwrap_or_else(|| panic!("no frame at offset {offset}"));
        let any: &mut dyn Any = slot.frame.as_mut();
        any.downcast_mut::<F>()
            .unwrap_or_else(|| panic!("frame at offset {offset} is not a {}", core::any::type_name::<F>()))
    }

    /// Seals the builder; the frame at offset 0 becomes the root.
    pub fn finalize(self) -> Result<Kernel> {
        if self.frames.is_empty() {
            return Err(Error::Unsupported(
                "cannot finalize a kernel without frames".to_string(),
            ));
        }
        trace!(frames = self.frames.len(), root = self.frames[0].frame.name(), "kernel finalized");
        Ok(Kernel {
            frames: self.frames,
        })
    }
}

/// A finalised kernel.
pub struct Kernel {
    frames: Vec<FrameSlot>,
}

impl Kernel {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Request the root frame was built for.
    pub fn request(&self) -> KernelRequest {
        self.frames[0].request
    }

    /// Frame names in construction order.
    pub fn frame_names(&self) -> Vec<&'static str> {
        self.frames.iter().map(|s| s.frame.name()).collect()
    }

    fn root(&mut self) -> (&mut FrameSlot, Children<'_>) {
        let (root, rest) = self
            .frames
            .split_first_mut()
            .unwrap_or_else(|| unreachable!());
        (root, Children { frames: rest })
    }

    /// Runs the kernel on one element.
    ///
    /// # Safety
    ///
    /// As [`KernelFrame::single`] for the root frame.
    pub unsafe fn single(&mut self, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let (root, children) = self.root();
        assert!(
            root.request == KernelRequest::Single,
            "kernel was built for {:?} calls",
            root.request
        );
        // SAFETY: forwarded from the caller.
        unsafe { root.frame.single(children, dst, src) }
    }

    /// Runs the kernel on a strided run of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`KernelFrame::strided`] for the root frame.
    pub unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let (root, children) = self.root();
        assert!(
            root.request.is_strided(),
            "kernel was built for single calls"
        );
        // SAFETY: forwarded from the caller.
        unsafe { root.frame.strided(children, dst, dst_stride, src, src_stride, count) }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.frames
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("[{i}] {} ({:?})", s.frame.name(), s.request)),
            )
            .finish()
    }
}

/// Loops a strided child over one fixed dimension.
///
/// Used for dimension-to-dimension assignment and for lifting scalar kernels over dimensions.
/// A source stride of zero broadcasts that source along the dimension.
pub struct DimLoopFrame {
    pub size: usize,
    pub dst_stride: isize,
    pub src_stride: Vec<isize>,
}

impl KernelFrame for DimLoopFrame {
    unsafe fn single(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> Result<()> {
        // SAFETY: the arrmeta this frame was built from describes `size` elements per operand.
        unsafe {
            children.strided(1, dst, self.dst_stride, src, &self.src_stride, self.size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// Test double counting constructions and destructions.
    struct Counted {
        alive: Arc<AtomicUsize>,
        order: Arc<std::sync::Mutex<Vec<usize>>>,
        tag: usize,
    }

    impl Counted {
        fn new(alive: &Arc<AtomicUsize>, order: &Arc<std::sync::Mutex<Vec<usize>>>, tag: usize) -> Self {
            alive.fetch_add(1, Ordering::SeqCst);
            Self {
                alive: alive.clone(),
                order: order.clone(),
                tag,
            }
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.alive.fetch_sub(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.tag);
        }
    }

    impl KernelFrame for Counted {
        unsafe fn single(&mut self, _: Children<'_>, dst: *mut u8, _: &[*const u8]) -> Result<()> {
            unsafe { *dst = self.tag as u8 };
            Ok(())
        }
    }

    struct AddOne {
        child: usize,
    }

    impl KernelFrame for AddOne {
        unsafe fn single(
            &mut self,
            mut children: Children<'_>,
            dst: *mut u8,
            src: &[*const u8],
        ) -> Result<()> {
            unsafe {
                children.single(self.child, dst, src)?;
                *dst += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn frames_destroyed_in_order() -> anyhow::Result<()> {
        let alive = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ckb = KernelBuilder::new();
        for tag in 0..4 {
            ckb.emplace(Counted::new(&alive, &order, tag), KernelRequest::Single);
        }
        assert_eq!(alive.load(Ordering::SeqCst), 4);
        let kernel = ckb.finalize()?;
        assert_eq!(kernel.len(), 4);
        drop(kernel);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn abandoned_builder_destroys_placed_frames() {
        let alive = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let build = || -> Result<Kernel> {
            let mut ckb = KernelBuilder::new();
            ckb.emplace(Counted::new(&alive, &order, 7), KernelRequest::Single);
            ckb.emplace(Counted::new(&alive, &order, 8), KernelRequest::Single);
            Err(Error::Unsupported("child factory failed".into()))
        };
        assert!(build().is_err());
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert_eq!(*order.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn empty_builder_cannot_finalize() {
        assert!(KernelBuilder::new().finalize().is_err());
    }

    #[test]
    fn parent_reaches_child_by_relative_offset() -> anyhow::Result<()> {
        let alive = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ckb = KernelBuilder::new();
        let root = ckb.emplace(AddOne { child: 0 }, KernelRequest::Single);
        let child = ckb.emplace(Counted::new(&alive, &order, 41), KernelRequest::Single);
        ckb.frame_mut::<AddOne>(root).child = child - root;
        let mut kernel = ckb.finalize()?;
        let mut out = 0u8;
        unsafe { kernel.single(&mut out, &[])? };
        assert_eq!(out, 42);
        Ok(())
    }

    #[test]
    fn default_strided_adapter() -> anyhow::Result<()> {
        let alive = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ckb = KernelBuilder::new();
        ckb.emplace(Counted::new(&alive, &order, 5), KernelRequest::Strided);
        let mut kernel = ckb.finalize()?;
        let mut out = [0u8; 6];
        unsafe { kernel.strided(out.as_mut_ptr(), 2, &[], &[], 3)? };
        assert_eq!(out, [5, 0, 5, 0, 5, 0]);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "built for single calls")]
    fn wrong_entry_point_panics() {
        let alive = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ckb = KernelBuilder::new();
        ckb.emplace(Counted::new(&alive, &order, 1), KernelRequest::Single);
        let mut kernel = ckb.finalize().unwrap();
        let mut out = 0u8;
        let _ = unsafe { kernel.strided(&mut out, 1, &[], &[], 1) };
    }

    #[test]
    #[should_panic(expected = "is not a")]
    fn frame_mut_checks_type() {
        let mut ckb = KernelBuilder::new();
        ckb.emplace(AddOne { child: 1 }, KernelRequest::Single);
        let _ = ckb.frame_mut::<DimLoopFrame>(0);
    }
}
