#![cfg(test)]

mod selection_flow_test;
