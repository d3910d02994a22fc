#![no_std]
#![no_main]

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::macros::{map, xdp};
use aya_ebpf::maps::{Array, LruHashMap};
use aya_ebpf::programs::XdpContext;
use ebaf_common::{
    ALLOW_SET_CAPACITY, BLOCK_SET_CAPACITY, STAT_BLOCKED, STAT_SLOTS, STAT_TOTAL,
};

const ETH_HDR_SIZE: usize = 14;
const ETH_P_IPV4: u16 = 0x0800;
const IPV4_MIN_HEADER_BYTES: usize = 20;
const H_PROTO_OFFSET: usize = 12;
const IPV4_SADDR_OFFSET: usize = 12;
const IPV4_DADDR_OFFSET: usize = 16;

// Keys are IPv4 addresses in network byte order, read straight out of the
// packet. The userspace side converts at its own boundary.

#[map(name = "block_set")]
static BLOCK_SET: LruHashMap<u32, u64> =
    LruHashMap::<u32, u64>::with_max_entries(BLOCK_SET_CAPACITY, 0);

#[map(name = "allow_set")]
static ALLOW_SET: LruHashMap<u32, u8> =
    LruHashMap::<u32, u8>::with_max_entries(ALLOW_SET_CAPACITY, 0);

#[map(name = "stats")]
static STATS: Array<u64> = Array::<u64>::with_max_entries(STAT_SLOTS, 0);

#[xdp]
pub fn xdp_blocker(ctx: XdpContext) -> u32 {
    if should_drop(ctx.data() as *const u8, ctx.data_end() as *const u8) {
        xdp_action::XDP_DROP
    } else {
        xdp_action::XDP_PASS
    }
}

fn should_drop(data: *const u8, data_end: *const u8) -> bool {
    bump_stat(STAT_TOTAL);

    if unsafe { data.add(ETH_HDR_SIZE) } > data_end {
        return false;
    }

    let h_proto = unsafe {
        let p = data.add(H_PROTO_OFFSET) as *const u16;
        u16::from_be(core::ptr::read_unaligned(p))
    };
    if h_proto != ETH_P_IPV4 {
        return false;
    }

    if unsafe { data.add(ETH_HDR_SIZE + IPV4_MIN_HEADER_BYTES) } > data_end {
        return false;
    }

    let ip_start = unsafe { data.add(ETH_HDR_SIZE) };
    let src = unsafe {
        let p = ip_start.add(IPV4_SADDR_OFFSET) as *const u32;
        core::ptr::read_unaligned(p)
    };
    let dst = unsafe {
        let p = ip_start.add(IPV4_DADDR_OFFSET) as *const u32;
        core::ptr::read_unaligned(p)
    };

    // Allow-set wins: a packet touching an allowed address is never dropped,
    // so these lookups must stay ahead of the block-set ones.
    if ALLOW_SET.get_ptr(&dst).is_some() || ALLOW_SET.get_ptr(&src).is_some() {
        return false;
    }

    if record_block(&dst) {
        return true;
    }
    if record_block(&src) {
        return true;
    }

    false
}

fn record_block(addr: &u32) -> bool {
    match BLOCK_SET.get_ptr_mut(addr) {
        Some(counter) => {
            unsafe {
                *counter = (*counter).wrapping_add(1);
            }
            bump_stat(STAT_BLOCKED);
            true
        }
        None => false,
    }
}

fn bump_stat(index: u32) {
    if let Some(counter) = STATS.get_ptr_mut(index) {
        unsafe {
            *counter = (*counter).wrapping_add(1);
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
