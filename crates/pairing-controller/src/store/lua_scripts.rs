//! Lua scripts for atomic queue operations.
//!
//! Queue members are JSON blobs (`{userId, timestamp}`), so membership
//! checks have to scan the sorted set and compare the decoded `userId`.
//! Running the scan and the mutation inside one script keeps the pair
//! atomic: two racing enqueues for the same user cannot both pass the
//! membership check, and a remove cannot interleave with a pop.

/// Lua script for the guarded enqueue.
///
/// Arguments:
/// - KEYS[1]: Queue key (`queue:waiting`)
/// - KEYS[2]: The user's room-mapping key (`user:room:<userId>`)
/// - ARGV[1]: Member to insert (JSON string)
/// - ARGV[2]: Score (enqueue timestamp, ms)
/// - ARGV[3]: User id (for the membership scan)
///
/// Returns:
/// - -1: User is mapped to a room; nothing written
/// -  0: User already queued; nothing written
/// - >0: Queue size after the insert (the user's 1-based position report)
pub const QUEUE_PUSH: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return -1
end

local members = redis.call('ZRANGE', KEYS[1], 0, -1)
for _, member in ipairs(members) do
    local entry = cjson.decode(member)
    if entry.userId == ARGV[3] then
        return 0
    end
end

redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return redis.call('ZCARD', KEYS[1])
"#;

/// Lua script for remove-by-user.
///
/// Arguments:
/// - KEYS[1]: Queue key (`queue:waiting`)
/// - ARGV[1]: User id
///
/// Returns:
/// - 1: An entry was removed
/// - 0: No entry for this user
pub const QUEUE_REMOVE: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
for _, member in ipairs(members) do
    local entry = cjson.decode(member)
    if entry.userId == ARGV[1] then
        redis.call('ZREM', KEYS[1], member)
        return 1
    end
end
return 0
"#;
