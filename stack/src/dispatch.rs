//! Protocol dispatch: immutable 256-slot handler tables for the IPv4
//! protocol field and the IPv6 next-header chain.
//!
//! The registry is built once at stack construction and read lock-free
//! afterwards.  IPv6 handlers participate in extension-header chain
//! processing through an [`Ipv6Walk`] cursor; a protocol registered with
//! only a v4 hook gets a terminal v6 slot that ends the chain and calls
//! the v4 hook, so transport protocols register one function for both
//! families.

use packnet_pktio::Packet;

use crate::stack::Stack;
use crate::types::{Verdict, ip_proto};

/// IPv4 protocol handler (also the terminal form for IPv6).
pub type Hook4 = fn(&Stack, Packet) -> Verdict;

/// IPv6 chain handler: may consume the packet (terminal verdict) or
/// advance the walk and hand the packet back via `Verdict::Continue`.
pub type Hook6 = fn(&Stack, Packet, &mut Ipv6Walk) -> Verdict;

/// Cursor over an IPv6 extension-header chain.
#[derive(Clone, Copy, Debug)]
pub struct Ipv6Walk {
    /// Protocol number of the header at `hdr_offset`.
    pub next_header: u8,
    /// Absolute buffer offset of that header.
    pub hdr_offset: u16,
}

#[derive(Clone, Copy)]
enum V6Slot {
    Chained(Hook6),
    /// No v6 hook registered: end chain processing, call the v4 hook.
    Terminal(Hook4),
}

pub struct RegistryBuilder {
    v4: [Option<Hook4>; 256],
    v6: [Option<V6Slot>; 256],
    default4: Option<Hook4>,
    default6: Option<Hook6>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            v4: [None; 256],
            v6: [None; 256],
            default4: None,
            default6: None,
        }
    }

    /// Register a transport handler for both families: the v6 side gets
    /// the terminal wrapper.
    pub fn transport(mut self, proto: u8, hook: Hook4) -> Self {
        self.v4[proto as usize] = Some(hook);
        self.v6[proto as usize] = Some(V6Slot::Terminal(hook));
        self
    }

    /// Register a v4-only handler.
    pub fn protocol4(mut self, proto: u8, hook: Hook4) -> Self {
        self.v4[proto as usize] = Some(hook);
        self
    }

    /// Register a v6 chain handler.
    pub fn protocol6(mut self, proto: u8, hook: Hook6) -> Self {
        self.v6[proto as usize] = Some(V6Slot::Chained(hook));
        self
    }

    pub fn default4(mut self, hook: Hook4) -> Self {
        self.default4 = Some(hook);
        self
    }

    pub fn default6(mut self, hook: Hook6) -> Self {
        self.default6 = Some(hook);
        self
    }

    /// Finalize the tables.  A missing default handler is a construction
    /// bug, not a runtime condition.
    pub fn build(self) -> ProtocolRegistry {
        let default4 = match self.default4 {
            Some(h) => h,
            None => panic!("protocol registry built without a default IPv4 handler"),
        };
        let default6 = match self.default6 {
            Some(h) => h,
            None => panic!("protocol registry built without a default IPv6 handler"),
        };
        let mut v4 = [default4; 256];
        let mut v6 = [V6Slot::Chained(default6); 256];
        for (i, slot) in self.v4.iter().enumerate() {
            if let Some(h) = slot {
                v4[i] = *h;
            }
        }
        for (i, slot) in self.v6.iter().enumerate() {
            if let Some(s) = slot {
                v6[i] = *s;
            }
        }
        ProtocolRegistry { v4, v6 }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable-after-build protocol handler tables.
pub struct ProtocolRegistry {
    v4: [Hook4; 256],
    v6: [V6Slot; 256],
}

impl ProtocolRegistry {
    pub fn dispatch4(&self, stack: &Stack, proto: u8, pkt: Packet) -> Verdict {
        (self.v4[proto as usize])(stack, pkt)
    }

    /// Dispatch one step of an IPv6 chain.  Terminal slots clear the walk
    /// (next header = no-next-header) before invoking the handler.
    pub fn dispatch6(&self, stack: &Stack, pkt: Packet, walk: &mut Ipv6Walk) -> Verdict {
        match self.v6[walk.next_header as usize] {
            V6Slot::Chained(h) => h(stack, pkt, walk),
            V6Slot::Terminal(h) => {
                walk.next_header = ip_proto::NONE;
                h(stack, pkt)
            }
        }
    }
}
