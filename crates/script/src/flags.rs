//! Script verification rule flags.
//!
//! Every bit gates one independent rule, and setting a bit only ever
//! makes evaluation stricter. The one documented overlap: CLEANSTACK is
//! only defined together with P2SH, so callers must set both.

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 7;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: ScriptFlags = 1 << 9;
pub const SCRIPT_VERIFY_NULLFAIL: ScriptFlags = 1 << 10;
pub const SCRIPT_ENABLE_SIGHASH_FORKID: ScriptFlags = 1 << 16;
pub const SCRIPT_ENABLE_REPLAY_PROTECTION: ScriptFlags = 1 << 17;

/// Consensus-critical flags every block transaction is checked under.
pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH
    | SCRIPT_ENABLE_SIGHASH_FORKID
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;

/// Relay policy flags: the mandatory set plus local standardness rules.
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_LOW_S
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK
    | SCRIPT_VERIFY_NULLFAIL;

// The script cache records mempool successes under the mandatory set;
// that is only sound while the standard set covers the mandatory one.
const _: () = assert!(
    STANDARD_SCRIPT_VERIFY_FLAGS & MANDATORY_SCRIPT_VERIFY_FLAGS == MANDATORY_SCRIPT_VERIFY_FLAGS
);

/// True when validity under `stronger` implies validity under `weaker`,
/// i.e. every rule bit of `weaker` is also present in `stronger`.
pub fn covers(stronger: ScriptFlags, weaker: ScriptFlags) -> bool {
    stronger & weaker == weaker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_covers_mandatory() {
        assert!(covers(
            STANDARD_SCRIPT_VERIFY_FLAGS,
            MANDATORY_SCRIPT_VERIFY_FLAGS
        ));
        assert!(!covers(
            MANDATORY_SCRIPT_VERIFY_FLAGS,
            STANDARD_SCRIPT_VERIFY_FLAGS
        ));
    }

    #[test]
    fn cleanstack_callers_must_add_p2sh() {
        assert!(covers(STANDARD_SCRIPT_VERIFY_FLAGS, SCRIPT_VERIFY_P2SH));
        assert!(covers(
            STANDARD_SCRIPT_VERIFY_FLAGS,
            SCRIPT_VERIFY_CLEANSTACK
        ));
    }
}
