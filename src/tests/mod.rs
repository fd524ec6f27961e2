mod analysis_tests;
mod cfg_tests;
mod roundtrip_tests;
mod to_stack_tests;
