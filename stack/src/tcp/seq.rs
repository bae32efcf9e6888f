//! Modular 32-bit sequence-number arithmetic.
//!
//! Sequence comparisons look at the sign bit of the wrapped difference,
//! never at `<`: with a 4 GiB sequence space, "lower" only makes sense
//! within a half-space window of the reference point.

/// `a` is strictly before `b` in sequence space.
#[inline]
pub const fn seq_lt(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) & 0x8000_0000 != 0
}

/// `a` is at or before `b`.
#[inline]
pub const fn seq_le(a: u32, b: u32) -> bool {
    !seq_lt(b, a)
}

/// `a` is strictly after `b`.
#[inline]
pub const fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// `a` is at or after `b`.
#[inline]
pub const fn seq_ge(a: u32, b: u32) -> bool {
    !seq_lt(a, b)
}

/// RFC 793 sequence-acceptability test, keyed on (segment length,
/// receive window):
///
/// | SEG.LEN | RCV.WND | accept iff                                     |
/// |---------|---------|------------------------------------------------|
/// | 0       | 0       | SEG.SEQ == RCV.NXT                             |
/// | 0       | >0      | RCV.NXT <= SEG.SEQ < RCV.NXT+RCV.WND           |
/// | >0      | 0       | never                                          |
/// | >0      | >0      | first or last segment byte inside the window   |
pub fn segment_acceptable(rcv_nxt: u32, rcv_wnd: u32, seg_seq: u32, seg_len: u32) -> bool {
    if rcv_wnd == 0 {
        return seg_len == 0 && seg_seq == rcv_nxt;
    }
    let end_win = rcv_nxt.wrapping_add(rcv_wnd);
    let head_in = seq_le(rcv_nxt, seg_seq) && seq_lt(seg_seq, end_win);
    if seg_len == 0 {
        return head_in;
    }
    let seg_end = seg_seq.wrapping_add(seg_len).wrapping_sub(1);
    head_in || (seq_le(rcv_nxt, seg_end) && seq_lt(seg_end, end_win))
}
