mod common;

mod dispatch_tests;
