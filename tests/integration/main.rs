#[macro_use]
mod macros;
mod runner;

integration_test_cases! {
    "tests/fixtures",
    test_age_check_adult => "age_check_adult",
    test_age_check_minor => "age_check_minor",
    test_switch_default => "switch_default",
    test_while_loop_bound => "while_loop_bound",
    test_while_loop_limit => "while_loop_limit",
    test_skip_cascade => "skip_cascade",
    test_cycle_on_dead_branch => "cycle_on_dead_branch",
    test_nested_cycle => "nested_cycle",
    test_for_each_reduce => "for_each_reduce",
    test_try_catch_recover => "try_catch_recover",
    test_shared_counter => "shared_counter",
    test_all_live_merge => "all_live_merge",
    test_profile_sports_adult => "profile_sports_adult",
    test_profile_sports_minor => "profile_sports_minor",
}
