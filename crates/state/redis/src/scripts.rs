/// Lua script for the batched window init-or-increment.
///
/// KEYS = window_key, counter_key pairs, two at a time
/// ARGV\[1\] = now (integer epoch seconds)
/// ARGV\[2\] = window size in seconds
/// ARGV\[3\] = increment
///
/// For each pair: if the window key is missing, the counter key is
/// missing (TTL lapse), or the window has elapsed, both keys are reset
/// with TTL = window size. Otherwise the counter is incremented. A
/// window start in the future (a peer's clock ahead of ours) reads as a
/// live window and increments.
///
/// Returns a flat array `[window_start, counter, ...]` in input order.
pub const BATCH_WINDOW_SCRIPT: &str = r"
local results = {}
local now = tonumber(ARGV[1])
local window_size = tonumber(ARGV[2])
local increment = tonumber(ARGV[3])

for i = 1, #KEYS, 2 do
    local window_key = KEYS[i]
    local counter_key = KEYS[i + 1]

    local window_start = redis.call('GET', window_key)
    local counter_alive = redis.call('EXISTS', counter_key)
    if not window_start
        or counter_alive == 0
        or (now - tonumber(window_start)) >= window_size
    then
        redis.call('SET', window_key, tostring(now))
        redis.call('SET', counter_key, increment)
        redis.call('EXPIRE', window_key, window_size)
        redis.call('EXPIRE', counter_key, window_size)
        table.insert(results, now)
        table.insert(results, increment)
    else
        local counter = redis.call('INCRBY', counter_key, increment)
        table.insert(results, tonumber(window_start))
        table.insert(results, counter)
    end
end

return results
";
